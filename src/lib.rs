//! Core of the OverDrive Libby plugin for calibre
//!
//! Preference storage, Libby setup-code linking and the settings save flow.
//! The host plugin reaches it through the C functions in `host_bridge`.

pub mod api;
pub mod error;
pub mod host_bridge;
pub mod settings;
pub mod storage;

pub use error::{LibbyError, Result};

/// Crate version, reported to the host
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
