//! Module for collaborators the session manager delegates to.
//!
//! Currently this is the outbound mail used for password-reset links.

pub mod email_service;

pub use email_service::{EmailSender, EmailService, LogEmailSender};
