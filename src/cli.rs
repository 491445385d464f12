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

//! Command-line argument surface for pipeline binaries.
//!
//! Embed [`ExecutionArgs`] with `#[command(flatten)]` or parse it directly;
//! [`start_from_args`] builds the app, runs migrations and opens the
//! execution in one call.

use std::path::PathBuf;

use clap::Parser;

use crate::app::{Sluice, StartOptions};
use crate::error::ExecutionError;
use crate::execution::Execution;

/// Standard execution arguments shared by pipeline binaries.
#[derive(Parser, Debug, Clone)]
pub struct ExecutionArgs {
    /// Unique name of this execution (letters, numbers, hyphens, underscores)
    #[arg(short = 'n', long)]
    pub name: String,

    /// Directory task output and logs are written under
    #[arg(short = 'o', long)]
    pub output_dir: PathBuf,

    /// Global CPU budget; unset means unlimited
    #[arg(long)]
    pub max_cpus: Option<u32>,

    /// Submissions allowed per task
    #[arg(long, default_value_t = 1)]
    pub max_attempts: u32,

    /// Delete non-successful tasks of a previous attempt before running
    #[arg(long)]
    pub restart: bool,

    /// Do not prompt before the restart deletion
    #[arg(short = 'y', long)]
    pub skip_confirm: bool,

    /// DRM backend to submit to
    #[arg(long, default_value = "local")]
    pub default_drm: String,

    /// Queue passed to the DRM, when it has queues
    #[arg(long)]
    pub default_queue: Option<String>,

    /// Database location; falls back to SLUICE_DATABASE_URL
    #[arg(long, env = "SLUICE_DATABASE_URL")]
    pub database_url: Option<String>,
}

impl ExecutionArgs {
    pub fn start_options(&self) -> StartOptions {
        StartOptions {
            name: self.name.clone(),
            output_dir: self.output_dir.clone(),
            max_cpus: self.max_cpus,
            max_attempts: self.max_attempts.max(1),
            restart: self.restart,
            skip_confirm: self.skip_confirm,
        }
    }
}

/// Builds the app from parsed arguments, initializes the database and opens
/// the execution.
pub fn start_from_args(args: &ExecutionArgs) -> Result<(Sluice, Execution), ExecutionError> {
    let app = Sluice::new(
        args.database_url.as_deref(),
        &args.default_drm,
        args.default_queue.as_deref(),
    )?;
    app.initdb()?;
    let execution = app.start(args.start_options())?;
    Ok((app, execution))
}
