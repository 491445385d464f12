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

//! Distributed resource manager backends.
//!
//! The engine is a *client* of a DRM. Backends implement the poll-based
//! [`Drm`] trait; only the local fork backend ships here, but the
//! native-specification strings for LSF and Grid Engine are rendered by
//! [`native_specification`] so external adapters submit with the same flags
//! the original system used.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{ConfigurationError, JobError};
use crate::task::Task;

/// Everything a backend needs to start one job.
pub struct SubmitSpec<'a> {
    pub task_id: i32,
    /// The shell script to run (`<log_dir>/command.sh`).
    pub script: &'a Path,
    pub log_dir: &'a Path,
    /// Backend-specific flags from [`native_specification`].
    pub native_specification: Option<String>,
    pub queue: Option<&'a str>,
}

/// One terminated job as observed by the backend.
#[derive(Debug, Clone, Copy)]
pub struct DrmJobResult {
    pub task_id: i32,
    pub exit_status: i32,
    pub wall_seconds: f64,
}

/// A poll-based DRM client. `submit` must not block on job completion;
/// `poll` returns jobs that terminated since the previous call.
pub trait Drm: Send {
    fn name(&self) -> &str;

    fn submit(&mut self, spec: &SubmitSpec<'_>) -> Result<(), JobError>;

    fn poll(&mut self) -> Vec<DrmJobResult>;

    /// Kills and reaps every in-flight job; returns their task ids.
    /// Idempotent.
    fn terminate(&mut self) -> Vec<i32>;
}

/// Renders the backend-specific native-specification string for a task.
///
/// - `lsf`: `-R "rusage[mem={mem_per_cpu}] span[hosts=1]" -n {cpu_req}`,
///   plus ` -W 0:{time_req}` when a time requirement is set.
/// - any name containing `ge`: `-l h_vmem={mem_req}M,num_proc={cpu_req}`.
/// - `local`: no native specification (direct fork).
///
/// Any other name is a fatal configuration error.
pub fn native_specification(
    drm: &str,
    task: &Task,
) -> Result<Option<String>, ConfigurationError> {
    if drm.contains("lsf") {
        let mem_per_cpu = task.mem_req.unwrap_or(0) / task.cpu_req.max(1);
        let mut s = format!(
            "-R \"rusage[mem={}] span[hosts=1]\" -n {}",
            mem_per_cpu, task.cpu_req
        );
        if let Some(time_req) = task.time_req {
            s.push_str(&format!(" -W 0:{}", time_req));
        }
        Ok(Some(s))
    } else if drm.contains("ge") {
        Ok(Some(format!(
            "-l h_vmem={}M,num_proc={}",
            task.mem_req.unwrap_or(0),
            task.cpu_req
        )))
    } else if drm == "local" {
        Ok(None)
    } else {
        Err(ConfigurationError::UnsupportedDrm(drm.to_string()))
    }
}

/// Checks that a DRM name selects one of the known formatters.
pub fn validate_drm_name(name: &str) -> Result<(), ConfigurationError> {
    if name == "local" || name.contains("lsf") || name.contains("ge") {
        Ok(())
    } else {
        Err(ConfigurationError::UnsupportedDrm(name.to_string()))
    }
}

/// Instantiates the backend for a DRM name. Only `local` ships with the
/// engine; cluster backends plug in through the [`Drm`] trait.
pub fn create_drm(name: &str) -> Result<Box<dyn Drm>, ConfigurationError> {
    match name {
        "local" => Ok(Box::new(LocalDrm::new())),
        other => Err(ConfigurationError::UnsupportedDrm(other.to_string())),
    }
}

struct LocalJob {
    child: Child,
    started: Instant,
}

/// Runs jobs as forked `/bin/sh` processes on the local host, with stdout
/// and stderr captured into the task log directory.
#[derive(Default)]
pub struct LocalDrm {
    jobs: HashMap<i32, LocalJob>,
}

impl LocalDrm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Drm for LocalDrm {
    fn name(&self) -> &str {
        "local"
    }

    fn submit(&mut self, spec: &SubmitSpec<'_>) -> Result<(), JobError> {
        let stdout = File::create(spec.log_dir.join("stdout"))?;
        let stderr = File::create(spec.log_dir.join("stderr"))?;
        let child = Command::new("/bin/sh")
            .arg(spec.script)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()?;
        debug!(
            "Forked task {} as pid {} ({})",
            spec.task_id,
            child.id(),
            spec.script.display()
        );
        self.jobs.insert(
            spec.task_id,
            LocalJob {
                child,
                started: Instant::now(),
            },
        );
        Ok(())
    }

    fn poll(&mut self) -> Vec<DrmJobResult> {
        let mut finished = Vec::new();
        for (&task_id, job) in self.jobs.iter_mut() {
            match job.child.try_wait() {
                Ok(Some(status)) => {
                    // A signal-terminated child has no exit code.
                    let exit_status = status.code().unwrap_or(255);
                    finished.push(DrmJobResult {
                        task_id,
                        exit_status,
                        wall_seconds: job.started.elapsed().as_secs_f64(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to poll task {}: {}", task_id, e);
                    finished.push(DrmJobResult {
                        task_id,
                        exit_status: 255,
                        wall_seconds: job.started.elapsed().as_secs_f64(),
                    });
                }
            }
        }
        for result in &finished {
            self.jobs.remove(&result.task_id);
        }
        finished.sort_by_key(|r| r.task_id);
        finished
    }

    fn terminate(&mut self) -> Vec<i32> {
        let mut killed: Vec<i32> = Vec::new();
        for (&task_id, job) in self.jobs.iter_mut() {
            if let Err(e) = job.child.kill() {
                warn!("Failed to kill task {}: {}", task_id, e);
            }
            let _ = job.child.wait();
            killed.push(task_id);
        }
        self.jobs.clear();
        killed.sort_unstable();
        killed
    }
}
