//! Sector Rotation Module
//!
//! Relative Rotation Graph (RRG) coordinates for a basket of sector ETFs
//! against a benchmark, with a persisted cache that is reused when it covers
//! a requested range and recomputed incrementally each week.

pub mod benchmark;
pub mod calculation;
pub mod comparison;
pub mod db;
pub mod ema;
pub mod persistence;
pub mod rolling_stats;
pub mod schedule;
pub mod week;

pub use benchmark::{BenchmarkCalculator, DEFAULT_BENCHMARK_SYMBOL};
pub use calculation::RotationCalculationService;
pub use comparison::{ComparisonDifference, ComparisonSummary, RotationComparison, RotationComparisonService};
pub use db::RotationDb;
pub use persistence::{IncrementalUpdate, RotationPersistenceService};
pub use rolling_stats::{RollingStats, RollingWindow};
pub use schedule::{next_run_after, WeeklyRotationJob};
pub use week::{bucket_weekly, is_monday, monday_of, week_key, WeeklySeries};
