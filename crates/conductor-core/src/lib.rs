//! Core types and error definitions for the Conductor stage orchestrator.
//!
//! This crate holds the pieces every other Conductor crate shares: the task
//! aggregate and its state machine, DAG templates and their selection
//! predicates, the stage executor contract, and agent health records.
//!
//! # Main types
//!
//! - [`ConductorError`]: Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`]: Convenience alias for `Result<T, ConductorError>`.
//! - [`Task`]: One query's run through its plan, with guarded transitions.
//! - [`Template`]: An immutable, versioned ordered list of stages.
//! - [`StageInput`] / [`StageResult`]: What an executor receives and returns.
//! - [`StageRecord`]: One entry of a task's append-only stage log.
//! - [`AgentHealth`]: Heartbeat-driven health record of one agent.

/// Error enum and result alias.
pub mod error;
/// Agent health records and heartbeat payloads.
pub mod health;
/// Stage executor contract and stage log records.
pub mod stage;
/// The task aggregate and its state machine.
pub mod task;
/// DAG templates and query features.
pub mod template;

pub use error::{ConductorError, ConductorResult};
pub use health::{AgentHealth, AgentStatus, HealthSnapshot};
pub use stage::{FailureKind, StageAction, StageInput, StageOutput, StageRecord, StageResult};
pub use task::{Task, TaskResponse, TaskStatus};
pub use template::{Complexity, QueryFeatures, Template, TemplateConditions, TemplateDefinition};
