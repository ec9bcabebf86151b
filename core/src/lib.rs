//! # TDE Engine Core
//!
//! Shared foundations for the engine's runtime crates:
//!
//! - [`error`] - the engine-wide [`ErrorKind`] taxonomy
//! - [`memory`] - linear, stack and pool arena allocators
//! - [`profiling`] - optional Tracy instrumentation macros

pub mod error;
pub mod memory;
pub mod profiling;

pub use error::ErrorKind;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
