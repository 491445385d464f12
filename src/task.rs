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

//! Tasks and task files.
//!
//! A [`Task`] is one unit of work: a command submitted at most `max_attempts`
//! times to the DRM, identified within its stage by its tag mapping. A
//! [`TaskFile`] is a declared filesystem artifact produced by exactly one
//! task; children reference their parents' outputs as inputs by value, so
//! deleting a task only cascades to the files it produced.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::TaskStatus;
use crate::tags::{format_tags, Tags};

/// A declared filesystem artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFile {
    /// Row id, assigned on first persist.
    #[serde(skip)]
    pub id: Option<i32>,
    /// Logical role of the file, e.g. "bam".
    pub name: String,
    /// File name within the task's output directory.
    pub basename: String,
    /// Absolute or output-dir-relative location of the artifact.
    pub path: PathBuf,
    /// Survives `restart` deletion of a failed task.
    pub persist: bool,
    /// Exempts this file from the unique-path invariant.
    pub duplicate_ok: bool,
    /// The producing task. Zero until the task row exists.
    pub task_id: i32,
}

impl fmt::Display for TaskFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<TaskFile {}:{}>", self.name, self.path.display())
    }
}

/// Observed runtime metrics for one attempt of a task.
///
/// Serialised to `profile.json` in the task log directory and into the task
/// row on commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Exit status of the last attempt; 0 means success.
    pub exit_status: Option<i32>,
    /// Wall-clock seconds between submission and termination.
    pub wall_seconds: Option<f64>,
    pub submitted_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
}

/// One unit of work within a stage.
#[derive(Debug, Clone)]
pub struct Task {
    /// Row id. Zero only on drafts that have not been persisted yet.
    pub id: i32,
    pub stage_id: i32,
    /// Denormalised stage name, kept for log lines and error messages.
    pub stage_name: String,
    /// Identity of the task within its stage.
    pub tags: Tags,
    pub cpu_req: u32,
    /// Advisory memory requirement in MB, forwarded to the DRM.
    pub mem_req: Option<u32>,
    /// Advisory wall-clock limit in minutes, forwarded to the DRM.
    pub time_req: Option<u32>,
    /// When set, a permanent failure prunes all descendants and fails the run.
    pub must_succeed: bool,
    /// NOOP tasks are never forked; they complete immediately with status 0.
    pub noop: bool,
    pub status: TaskStatus,
    /// Number of submissions so far.
    pub attempt: u32,
    pub log_dir: Option<PathBuf>,
    /// Rendered shell command; `None` for NOOP tasks.
    pub command: Option<String>,
    pub profile: Profile,
    /// Parent task ids within the same execution.
    pub parents: Vec<i32>,
    /// Child task ids within the same execution.
    pub children: Vec<i32>,
    /// Resolved copies of the parent outputs this task consumes.
    pub input_files: Vec<TaskFile>,
    /// Output files owned by this task.
    pub output_files: Vec<TaskFile>,
}

impl Task {
    /// Looks up an output file by logical name.
    pub fn output(&self, name: &str) -> Option<&TaskFile> {
        self.output_files.iter().find(|f| f.name == name)
    }

    pub fn successful(&self) -> bool {
        self.status == TaskStatus::Successful
    }

    /// True when every attempt allowed by the execution has been used.
    pub fn attempts_exhausted(&self, max_attempts: u32) -> bool {
        self.attempt >= max_attempts
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Task[{}] {} {}>",
            self.id,
            self.stage_name,
            format_tags(&self.tags)
        )
    }
}
