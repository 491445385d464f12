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

//! Status state machines for tasks, stages and executions.
//!
//! Statuses are stored as snake_case text in the database; the `as_str` /
//! `parse` pair is the row round-trip. Transitions are driven exclusively by
//! the scheduler thread, see the `scheduler` module.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Has not been attempted.
    NoAttempt,
    /// Accepted by the job manager, waiting for DRM submission.
    Waiting,
    /// Submitted to the DRM.
    Submitted,
    /// Finished successfully.
    Successful,
    /// Finished, but failed.
    Failed,
    /// Manually killed.
    Killed,
}

/// Lifecycle of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Has not been attempted.
    NoAttempt,
    /// At least one task has been submitted.
    Running,
    /// Still running, but a task has permanently failed.
    RunningButFailed,
    /// All tasks finished successfully.
    Successful,
    /// Finished, but failed.
    Failed,
    /// Manually killed.
    Killed,
}

/// Lifecycle of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Has not been attempted.
    NoAttempt,
    /// The scheduler loop is driving the task queue.
    Running,
    /// Finished successfully.
    Successful,
    /// A must-succeed task failed; the queue is draining.
    FailedButRunning,
    /// Finished, but failed.
    Failed,
    /// Manually killed.
    Killed,
}

macro_rules! status_strings {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Database text representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }

            /// Parses the database text representation.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

status_strings!(TaskStatus {
    NoAttempt => "no_attempt",
    Waiting => "waiting",
    Submitted => "submitted",
    Successful => "successful",
    Failed => "failed",
    Killed => "killed",
});

status_strings!(StageStatus {
    NoAttempt => "no_attempt",
    Running => "running",
    RunningButFailed => "running_but_failed",
    Successful => "successful",
    Failed => "failed",
    Killed => "killed",
});

status_strings!(ExecutionStatus {
    NoAttempt => "no_attempt",
    Running => "running",
    Successful => "successful",
    FailedButRunning => "failed_but_running",
    Failed => "failed",
    Killed => "killed",
});

impl ExecutionStatus {
    /// True for statuses that end the execution's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Successful | ExecutionStatus::Failed | ExecutionStatus::Killed
        )
    }
}
