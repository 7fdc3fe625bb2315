//! Helpers shared by the conffs entry points. Keep this to things that
//! depend only on the standard library and "core" crates.

mod tracing_util;
pub use tracing_util::*;
