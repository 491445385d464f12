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

//! Error types for the sluice engine.
//!
//! Errors are grouped by the phase that produces them: graph construction
//! (`ValidationError`), persistence (`StoreError`), app/DRM configuration
//! (`ConfigurationError`), command generation (`ToolError`), job submission
//! (`JobError`), and the run lifecycle (`ExecutionError`), which wraps the
//! others. Validation failures are raised before any row is written; store
//! failures are fatal to the run.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building or validating the task graph.
///
/// These are all fail-fast: no database mutation has happened when one of
/// them is returned.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Execution names are restricted to letters, digits, hyphens and underscores.
    #[error("invalid execution name '{0}': characters are limited to letters, numbers, hyphens and underscores")]
    InvalidName(String),

    /// `Execution::add` was called with an empty tool batch.
    #[error("cannot add an empty tool batch to stage '{stage}'")]
    EmptyToolBatch { stage: String },

    /// Two tools in one batch (or two tasks in one stage) share a tag mapping.
    #[error("duplicate tags {tags} in stage '{stage}': tags within a stage must be unique")]
    DuplicateTags { stage: String, tags: String },

    /// A tool declared a parent task that belongs to a different execution.
    #[error("parent task {task_id} does not belong to this execution")]
    CrossExecutionParent { task_id: i32 },

    /// A declared input name was not found on any parent task's outputs.
    #[error("could not find input '{input}' for stage '{stage}'")]
    UnknownInput { input: String, stage: String },

    /// Two non-`duplicate_ok` output files resolve to the same path.
    #[error("duplicate task file path '{path}' produced by tasks {first_task} and {second_task}")]
    DuplicateOutputPath {
        path: String,
        first_task: i32,
        second_task: i32,
    },

    /// Two tasks resolved to the same log directory.
    #[error("duplicate log directory '{path}' for tasks {first_task} and {second_task}")]
    DuplicateLogDir {
        path: String,
        first_task: i32,
        second_task: i32,
    },

    /// A task requests more CPUs than the execution allows.
    #[error("task {task_id} requires more cpus ({cpu_req}) than max_cpus ({max_cpus})")]
    CpuReqExceedsMax {
        task_id: i32,
        cpu_req: u32,
        max_cpus: u32,
    },

    /// A many2one/many2many relation groups on a tag key a parent task lacks.
    #[error("parent task {task_id} has no tag '{key}' required to group stage '{stage}'")]
    MissingGroupKey {
        key: String,
        stage: String,
        task_id: i32,
    },

    /// `i`, `o`, `inputs`, `outputs` and `params` cannot be used as tag keys.
    #[error("'{0}' is a reserved name and cannot be used as a tag key")]
    ReservedTagKey(String),

    /// The stage graph contains a cycle.
    #[error("stage dependency cycle detected involving '{stage}'")]
    CyclicDependency { stage: String },

    /// A stage lookup by name failed.
    #[error("stage '{0}' does not exist")]
    UnknownStage(String),

    /// An `Input`/`Inputs` tool points at a path that is not on disk.
    #[error("input path '{path}' does not exist")]
    MissingInputPath { path: String },

    /// A basename template references a key with no value.
    #[error("basename template for output '{output}' in stage '{stage}' references unknown key '{token}'")]
    BasenameTemplateKey {
        output: String,
        stage: String,
        token: String,
    },
}

/// Errors from the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("migration error: {0}")]
    Migration(String),

    /// The named execution is not present in the store.
    #[error("execution '{0}' not found")]
    ExecutionNotFound(String),
}

/// Errors in app or DRM configuration, fatal at start.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("DRM '{0}' is not supported")]
    UnsupportedDrm(String),

    #[error("no database URL: pass one to Sluice::new or set SLUICE_DATABASE_URL")]
    MissingDatabaseUrl,

    #[error("could not create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors raised while generating a task's command string.
#[derive(Error, Debug)]
pub enum ToolError {
    /// A `{placeholder}` in a template had no value in tags, parameters or settings.
    #[error("no value for placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),

    /// The tool rejected its inputs or parameters.
    #[error("{0}")]
    Command(String),
}

/// Errors raised while submitting or reaping jobs.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Submission requires `task.log_dir` to have been assigned.
    #[error("task {0} has no log directory")]
    MissingLogDir(i32),
}

/// Top-level error for the execution lifecycle (`start`, `run`, `delete`).
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("failed to generate command for task {task_id}: {source}")]
    Command {
        task_id: i32,
        source: ToolError,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was interrupted by SIGINT.
    #[error("execution terminated by SIGINT")]
    Killed,

    /// The user declined the restart confirmation prompt.
    #[error("restart of execution '{0}' declined")]
    RestartDeclined(String),
}
