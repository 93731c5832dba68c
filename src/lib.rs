//! Labwatch - Deterministic biomarker trend and alert engine
//!
//! Labwatch turns a snapshot of a person's lab results into trend analyses,
//! pattern detections, and a ranked list of advisory alerts:
//! snapshot ingestion → per-biomarker series → trend/patterns → alerts → store.
//!
//! ## Modules
//!
//! - **Trend**: regression direction, rate of change, descriptive statistics
//! - **Patterns**: seasonal, cyclical, baseline-deviation, abnormal-run detection
//! - **Alerts**: out-of-range, trend, and improvement alerts with grouping
//! - **Store**: session-scoped dismiss/acknowledge state over derived alerts
//!
//! Every computation is pure and deterministic: the same snapshot and session
//! always produce the same alerts, ids included.

pub mod alerts;
pub mod config;
pub mod error;
pub mod lookup;
pub mod patterns;
pub mod pipeline;
pub mod snapshot;
pub mod store;
pub mod trend;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use alerts::{alert_id, group_alerts, unacknowledged_count, AlertGenerator};
pub use config::EngineConfig;
pub use error::AnalysisError;
pub use lookup::{BiomarkerDictionary, BiomarkerLookup, NoLookup};
pub use patterns::{detect_consecutive_abnormal, PatternDetector};
pub use pipeline::{biomarker_trend_report, lab_results_to_alerts};
pub use snapshot::SnapshotAdapter;
pub use store::{AlertAvailability, AlertStore, SessionState};
pub use trend::analyze_trend;

/// Library version
pub const LABWATCH_VERSION: &str = env!("CARGO_PKG_VERSION");
