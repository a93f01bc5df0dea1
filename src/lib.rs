//! # confvault
//!
//! Keeps a directory of configuration files under auditable version control.
//! This facade re-exports [`confvault_core`]; the `confvault` binary lives in
//! the `confvault-cli` workspace member.

pub use confvault_core::*;
