//! Authentication module for sessions, second factors and password resets.
//!
//! This module provides the session manager plus its HTTP surface: handlers,
//! request models, the router and the bearer-token middleware.

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod service;
