/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! # Sluice
//!
//! A workflow execution engine for batch computational pipelines. A recipe
//! declares tool templates and their dependency relationships; the engine
//! expands it into a persistent, deduplicated DAG of tasks, submits ready
//! tasks to a distributed resource manager under a global CPU budget,
//! monitors completion, retries failures up to a per-execution attempt
//! limit, and resumes partially completed runs without re-running
//! successful work.
//!
//! ## Core Components
//!
//! - [`Recipe`]: build-time declaration of stages and relations
//! - [`Tool`]: declarative task template with inputs, outputs and resources
//! - [`Execution`]: a named run owning its stages, tasks and lifecycle
//! - [`JobManager`]: submission and polling against a DRM backend
//! - [`Sluice`]: the application handle (database, DRM defaults, settings)
//!
//! ## Example
//!
//! ```rust,no_run
//! use sluice::{Recipe, RunOptions, Sluice, StartOptions};
//!
//! # #[derive(Default)] struct Echo { tags: sluice::Tags }
//! # impl sluice::Tool for Echo {
//! #     fn name(&self) -> &str { "Echo" }
//! #     fn tags(&self) -> &sluice::Tags { &self.tags }
//! #     fn cmd(&self, _i: &sluice::InputMap, _o: &sluice::OutputMap, p: &sluice::Params)
//! #         -> Result<String, sluice::ToolError> { Ok(format!("echo {}", p["word"])) }
//! # }
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recipe = Recipe::new();
//! recipe.add_source(
//!     vec![
//!         Box::new(Echo { tags: sluice::tags! { "word" => "hello" } }),
//!         Box::new(Echo { tags: sluice::tags! { "word" => "world" } }),
//!     ],
//!     None,
//! );
//!
//! let app = Sluice::new(Some("sluice.db"), "local", None)?;
//! app.initdb()?;
//! let mut execution = app.start(StartOptions::new("test", "out/test").max_attempts(2))?;
//! execution.expand(recipe)?;
//! execution.run(RunOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod cli;
pub mod dal;
pub mod database;
pub mod error;
pub mod execution;
pub mod graph;
pub mod job;
pub mod logging;
pub mod models;
pub mod recipe;
pub mod scheduler;
pub mod signals;
pub mod stage;
pub mod status;
pub mod tags;
pub mod task;
pub mod tool;

pub use app::{Sluice, StartOptions};
pub use cli::ExecutionArgs;
pub use dal::DAL;
pub use database::Database;
pub use error::{
    ConfigurationError, ExecutionError, JobError, StoreError, ToolError, ValidationError,
};
pub use execution::{Execution, RunOptions, ToolInvocation};
pub use job::drm::{native_specification, Drm, DrmJobResult, LocalDrm, SubmitSpec};
pub use job::{FinishedTask, JobManager};
pub use recipe::{Recipe, Relation, StageRef};
pub use signals::{ExecutionTransition, StageTransition, StatusBus, TaskTransition};
pub use stage::Stage;
pub use status::{ExecutionStatus, StageStatus, TaskStatus};
pub use tags::{TagValue, Tags};
pub use task::{Profile, Task, TaskFile};
pub use tool::{
    Input, InputMap, InputSpec, Inputs, OutputMap, OutputSpec, Params, Settings, Tool,
};

use tracing_subscriber::EnvFilter;

/// Initializes `tracing` with an env-filter subscriber. `filter` overrides
/// `RUST_LOG`; the default level is `info`. Safe to call more than once.
pub fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(f) => EnvFilter::new(f),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}

/// Logging setup for tests: debug level, captured per test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
