//! Collection of credential primitives shared by the session manager.
//!
//! Password hashing, opaque token digests, TOTP verification, access-token
//! signing and at-rest sealing of OTP secrets.

pub mod crypto;
pub mod jwt;
pub mod otp;
pub mod password;
pub mod token_hash;
