//! Shared test utilities for the tile pyramid workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic raster generators and PNG writers
//! - Sinks that record or selectively fail publications
//! - Sample image keys and mosaic manifests
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{gradient_raster, RecordingSink};
//! ```

pub mod fixtures;
pub mod generators;
pub mod sinks;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
pub use sinks::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0, 1.0001, 0.001);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{}`\n right: `{}`\n  diff: `{}` > epsilon `{}`",
                left, right, diff, epsilon
            );
        }
    }};
}
