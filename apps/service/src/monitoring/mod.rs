/// Monitoring engine module - runs tests and tracks their alert lifecycle
///
/// This module is responsible for:
/// - Resolving targets against the enabled address families
/// - Executing probes with per-attempt timeouts and retries
/// - Tracking failure streaks (dedup / recovered flags)
/// - Running local rounds over test files
pub mod dedup;
pub mod executor;
pub mod resolve;
pub mod scheduler;
pub mod types;

pub use executor::TestExecutor;
pub use scheduler::{LocalScheduler, ResultSink};
pub use types::{Options, Test, TestResult};
