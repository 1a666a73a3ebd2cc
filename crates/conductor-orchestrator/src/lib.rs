//! Plan selection and stage dispatch for Conductor.
//!
//! A query is matched to a DAG template, persisted as a task, and walked
//! stage by stage by its own dispatcher loop. Stage work goes to executors
//! resolved by stage name; external agents plug in through the work queue.
//!
//! # Main types
//!
//! - [`Orchestrator`]: submits, aborts, waits on and recovers tasks.
//! - [`Dispatcher`]: the per-task state machine with retries, backoff and timeouts.
//! - [`TemplateRegistry`]: versioned templates and the selection policy.
//! - [`PlanSelector`]: query features and template choice.
//! - [`ExecutorRegistry`] / [`StageExecutor`]: the stage executor seam.
//! - [`WorkQueue`] / [`QueueExecutor`]: pull-based bridge to remote agents.
//! - [`ProgressPublisher`] / [`AgentMonitor`]: progress events and agent health.

/// Orchestrator tunables and retry policy.
pub mod config;
/// Per-task dispatch loop.
pub mod dispatcher;
/// Orchestration engine.
pub mod engine;
/// Stage executor trait and registry.
pub mod executor;
/// Agent health tracking.
pub mod monitor;
/// Progress event fan-out.
pub mod publisher;
/// Stage work queues for external agents.
pub mod queue;
/// Template registry.
pub mod registry;
/// Query feature extraction and plan choice.
pub mod selector;
/// Built-in templates.
pub mod templates;

pub use config::{OrchestratorConfig, RetryPolicy};
pub use dispatcher::{CancelSignal, Dispatcher};
pub use engine::Orchestrator;
pub use executor::{ExecutorRegistry, StageExecutor};
pub use monitor::{AgentMonitor, HealthSummary};
pub use publisher::{ProgressEvent, ProgressPublisher};
pub use queue::{QueueExecutor, WorkItem, WorkQueue};
pub use registry::{SelectionPolicy, TemplateRegistry};
pub use selector::PlanSelector;
pub use templates::{default_registry, default_templates, DEFAULT_TEMPLATE};
