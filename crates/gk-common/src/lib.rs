//! Gatekeeper Common
//!
//! Runtime support shared by the Gatekeeper crates and binaries.

pub mod logging;

pub use logging::{init_logging, LogFormat};
