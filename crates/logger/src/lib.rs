//! Shared tracing setup for the vigil binaries.

mod subscriber;

pub use subscriber::{LogFormat, init, init_with};
