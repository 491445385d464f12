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

//! # Job management
//!
//! The [`JobManager`] sits between the scheduler and a DRM backend. It
//! writes each attempt's `command.sh`, tracks in-flight jobs and their CPU
//! reservation, short-circuits NOOP tasks (reported finished with exit
//! status 0 without ever forking), and drains terminated jobs on poll.
//!
//! Status fields are owned by the scheduler: the manager bumps the attempt
//! counter and timing profile but the scheduler performs (and publishes) the
//! `waiting`/`submitted` transitions around [`JobManager::submit`], keeping
//! every status mutation on one thread of control.

pub mod drm;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ConfigurationError, JobError};
use crate::task::Task;

use drm::{create_drm, native_specification, Drm, SubmitSpec};

/// A task that has terminated since the previous poll.
#[derive(Debug, Clone, Copy)]
pub struct FinishedTask {
    pub task_id: i32,
    /// 0 means success.
    pub exit_status: i32,
    pub wall_seconds: f64,
}

struct RunningJob {
    cpu_req: u32,
}

/// Submits tasks to a DRM backend and reaps their completions.
pub struct JobManager {
    drm_name: String,
    drm: Box<dyn Drm>,
    default_queue: Option<String>,
    /// Identifies this manager in log lines.
    instance_id: Uuid,
    running: HashMap<i32, RunningJob>,
    /// NOOP completions to report on the next poll.
    finished_noops: Vec<i32>,
}

impl JobManager {
    pub fn new(drm_name: &str, default_queue: Option<String>) -> Result<Self, ConfigurationError> {
        let drm = create_drm(drm_name)?;
        Ok(Self {
            drm_name: drm_name.to_string(),
            drm,
            default_queue,
            instance_id: Uuid::new_v4(),
            running: HashMap::new(),
            finished_noops: Vec::new(),
        })
    }

    /// Constructs a manager over a caller-provided backend. Used by cluster
    /// adapters and tests.
    pub fn with_backend(
        drm_name: &str,
        drm: Box<dyn Drm>,
        default_queue: Option<String>,
    ) -> Self {
        Self {
            drm_name: drm_name.to_string(),
            drm,
            default_queue,
            instance_id: Uuid::new_v4(),
            running: HashMap::new(),
            finished_noops: Vec::new(),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Ids of tasks currently submitted and not yet reaped.
    pub fn running_task_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.running.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Sum of `cpu_req` over the in-flight tasks.
    pub fn cores_used(&self) -> u32 {
        self.running.values().map(|j| j.cpu_req).sum()
    }

    /// The native-specification string this manager's DRM wants for `task`.
    pub fn get_submit_args(&self, task: &Task) -> Result<Option<String>, ConfigurationError> {
        native_specification(&self.drm_name, task)
    }

    /// Starts one attempt of a task: bumps the attempt counter, writes
    /// `command.sh` into the task's log directory and hands the job to the
    /// DRM. NOOP tasks skip the fork and complete on the next poll.
    ///
    /// The caller must have assigned `task.log_dir` and, for non-NOOP tasks,
    /// `task.command`.
    pub fn submit(&mut self, task: &mut Task) -> Result<(), JobError> {
        let log_dir: PathBuf = task
            .log_dir
            .clone()
            .ok_or(JobError::MissingLogDir(task.id))?;

        task.attempt += 1;
        task.profile.submitted_on = Some(Utc::now());

        if task.noop {
            debug!("NOOP {} completes without submission", task);
            self.running.insert(
                task.id,
                RunningJob {
                    cpu_req: task.cpu_req,
                },
            );
            self.finished_noops.push(task.id);
            return Ok(());
        }

        fs::create_dir_all(&log_dir)?;
        // Declared outputs land at their own paths; make sure those
        // directories exist before the command runs.
        for file in &task.output_files {
            if let Some(parent) = file.path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let script = log_dir.join("command.sh");
        let command = task.command.clone().unwrap_or_default();
        fs::write(&script, format!("#!/bin/sh\n{}\n", command))?;

        let spec = SubmitSpec {
            task_id: task.id,
            script: &script,
            log_dir: &log_dir,
            native_specification: self.get_submit_args(task)?,
            queue: self.default_queue.as_deref(),
        };
        self.drm.submit(&spec)?;

        info!(
            "Submitted {} (attempt {}, cpu_req {})",
            task, task.attempt, task.cpu_req
        );
        self.running.insert(
            task.id,
            RunningJob {
                cpu_req: task.cpu_req,
            },
        );
        Ok(())
    }

    /// Drains the tasks that terminated since the last call. Non-blocking.
    pub fn get_finished_tasks(&mut self) -> Vec<FinishedTask> {
        let mut finished: Vec<FinishedTask> = self
            .finished_noops
            .drain(..)
            .map(|task_id| FinishedTask {
                task_id,
                exit_status: 0,
                wall_seconds: 0.0,
            })
            .collect();

        for result in self.drm.poll() {
            finished.push(FinishedTask {
                task_id: result.task_id,
                exit_status: result.exit_status,
                wall_seconds: result.wall_seconds,
            });
        }

        for f in &finished {
            self.running.remove(&f.task_id);
        }
        finished.sort_by_key(|f| f.task_id);
        finished
    }

    /// Signals every running job to stop and waits for them to reap.
    /// Returns the ids of the tasks that were killed. Idempotent.
    pub fn terminate(&mut self) -> Vec<i32> {
        let mut killed = self.drm.terminate();
        // NOOPs pending completion are cancelled rather than reported.
        for id in self.finished_noops.drain(..) {
            killed.push(id);
        }
        self.running.clear();
        killed.sort_unstable();
        killed
    }
}
