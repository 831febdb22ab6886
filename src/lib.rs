//! The login gate of the blog administration interface: password and remember-me logins, forced
//! password changes, safe mode and password recovery.

pub mod accounts;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gate;
pub mod mail;
pub mod servers;
pub mod sessions;
pub mod storage;
pub mod types;

pub use types::*;
