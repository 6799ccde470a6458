//! Runtime services shared by repository hosts.
//!
//! - [`config`]: layered application configuration (defaults, YAML, env)
//! - [`logging`]: tracing subscriber setup with per-target console and file output
//! - [`queue`]: the background work queue used for deferred writes
//! - [`executor`]: bounded fan-out for parallel bulk operations
//! - [`user`]: ambient user identity for audit attribution

pub mod config;
pub mod executor;
pub mod logging;
pub mod queue;
pub mod user;

pub use config::{default_logging_config, AppConfig, CliArgs, LoggingConfig, Section};
pub use executor::{ConcurrentExecutor, ExecutionSummary};
pub use queue::{BackgroundQueue, Job, QueueConfig, QueueError, WorkerQueue};
pub use user::{AnonymousUser, StaticUser, UserContext};
