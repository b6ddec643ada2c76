//! Gamification engine
//!
//! Ingests user-activity events, evaluates a user-authored rule set against
//! each one, and materializes rewards (points, badges, trophies, level
//! transitions) and spendings (transactions, peer transfers) onto persistent
//! per-user state.
//!
//! The pipeline: events land in a durable ingest queue; a worker pool
//! evaluates active rules (with history-aware conditions) and applies the
//! resulting plan under per-user serialization; badge, trophy, and level
//! awards feed synthetic events back into the queue for cascading rules. A
//! dry-run path shares the evaluation code and produces the same traces
//! without side effects.

pub mod catalog;
pub mod conditions;
pub mod config;
pub mod dryrun;
pub mod engine;
pub mod error;
pub mod executor;
pub mod models;
pub mod projection;
pub mod queue;
pub mod retention;
pub mod service;
pub mod storage;
pub mod worker;

pub use catalog::{CatalogBuilder, CatalogService, CatalogSnapshot};
pub use config::EngineConfig;
pub use dryrun::{DryRunResponse, DryRunService, DryRunSummary};
pub use engine::{MaterializationPlan, RuleEngine, RuleEvaluation};
pub use error::{EngineError, Result, StoreError};
pub use executor::{ExecutionOutcome, RewardExecutor};
pub use projection::ProjectionRebuilder;
pub use queue::IngestQueue;
pub use retention::RetentionSweeper;
pub use service::{GamificationEngine, IngestAck};
pub use worker::WorkerPool;
