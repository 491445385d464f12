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

//! # Scheduler
//!
//! The single-threaded cooperative loop driving a run. Each iteration
//! dispatches ready tasks when the CPU budget changed, reaps finished tasks,
//! applies the attempt policy, prunes descendants of fatal failures, commits
//! the batch, and sleeps for the poll interval. SIGINT terminates the run:
//! in-flight jobs are killed, reapable completions drained once, and the
//! execution is marked killed before the loop returns.
//!
//! Ordering within one iteration: all finished-task handling completes
//! before any submission of the next iteration begins. Every status field is
//! mutated here, on this one thread of control.

use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::error::ExecutionError;
use crate::execution::Execution;
use crate::graph::TaskQueue;
use crate::job::JobManager;
use crate::status::{ExecutionStatus, StageStatus, TaskStatus};

/// Sleep between scheduler iterations.
pub const POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Drives the task queue until it is empty or the run is interrupted.
pub(crate) async fn run_scheduler(
    execution: &mut Execution,
    jobmanager: &mut JobManager,
    task_queue: &mut TaskQueue,
) -> Result<(), ExecutionError> {
    execution.log().info(&format!(
        "Executing task graph: {} tasks ready to run",
        task_queue.len()
    ));

    let mut interval = tokio::time::interval(POLL_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut budget_changed = true;
    while !task_queue.is_empty() {
        if budget_changed {
            dispatch_ready(execution, jobmanager, task_queue)?;
            budget_changed = false;
        }

        for task_id in process_finished(execution, jobmanager) {
            handle_finished(execution, task_queue, task_id);
            budget_changed = true;
        }

        // Nothing in flight and nothing dispatchable means the queue can
        // never drain (e.g. a failed run reopened without restart).
        if !budget_changed && jobmanager.running_count() == 0 {
            let stalled = task_queue.roots().iter().all(|id| {
                execution
                    .task(*id)
                    .map(|t| t.status != TaskStatus::NoAttempt)
                    .unwrap_or(true)
            });
            if stalled && !task_queue.is_empty() {
                execution.log().error(&format!(
                    "{} tasks remain but none are dispatchable; \
                     previously failed tasks require a restart",
                    task_queue.len()
                ));
                execution.set_execution_status(ExecutionStatus::FailedButRunning);
                execution.commit()?;
                break;
            }
        }

        execution.commit()?;

        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                execution.log().info("Caught SIGINT (ctrl+c)");
                terminate_run(execution, jobmanager, false)?;
                return Err(ExecutionError::Killed);
            }
        }
    }
    Ok(())
}

/// Submits ready tasks in ascending `(cpu_req, id)` order until the CPU
/// budget is exhausted. The walk stops at the first task that does not fit;
/// it does not skip ahead to smaller ones behind it.
fn dispatch_ready(
    execution: &mut Execution,
    jobmanager: &mut JobManager,
    task_queue: &TaskQueue,
) -> Result<(), ExecutionError> {
    let mut ready: Vec<i32> = task_queue
        .roots()
        .into_iter()
        .filter(|id| {
            execution
                .task(*id)
                .map(|t| t.status == TaskStatus::NoAttempt)
                .unwrap_or(false)
        })
        .collect();
    ready.sort_by_key(|id| {
        (
            execution.task(*id).map(|t| t.cpu_req).unwrap_or(0),
            *id,
        )
    });

    for task_id in ready {
        let cpu_req = execution
            .task(task_id)
            .map(|t| t.cpu_req)
            .unwrap_or(0);
        if let Some(max_cpus) = execution.max_cpus() {
            let cores_used = jobmanager.cores_used();
            if cpu_req + cores_used > max_cpus {
                execution.log().info(&format!(
                    "Reached max_cpus limit of {}, waiting for a task to finish...",
                    max_cpus
                ));
                break;
            }
        }
        submit_task(execution, jobmanager, task_id)?;
    }

    execution.commit()?;
    Ok(())
}

fn submit_task(
    execution: &mut Execution,
    jobmanager: &mut JobManager,
    task_id: i32,
) -> Result<(), ExecutionError> {
    debug_assert!(
        execution
            .task(task_id)
            .map(|t| t
                .parents
                .iter()
                .all(|p| execution.task(*p).map(|p| p.successful()).unwrap_or(false)))
            .unwrap_or(false),
        "task {} dispatched before its parents finished",
        task_id
    );

    execution.set_task_status(task_id, TaskStatus::Waiting);
    if let Some(task) = execution.task_mut(task_id) {
        jobmanager.submit(task)?;
    }
    execution.set_task_status(task_id, TaskStatus::Submitted);
    execution.note_task_submitted(task_id);
    Ok(())
}

/// Reaps finished tasks from the job manager and applies the attempt
/// policy: exit 0 (or NOOP) succeeds; a non-zero exit with attempts left
/// resets the task to `no_attempt` for redispatch; otherwise it fails.
/// Returns the affected task ids.
fn process_finished(execution: &mut Execution, jobmanager: &mut JobManager) -> Vec<i32> {
    let finished = jobmanager.get_finished_tasks();
    let max_attempts = execution.max_attempts();
    let mut handled = Vec::with_capacity(finished.len());

    for done in finished {
        let (noop, attempt, label) = {
            let Some(task) = execution.task_mut(done.task_id) else {
                continue;
            };
            task.profile.exit_status = Some(done.exit_status);
            task.profile.wall_seconds = Some(done.wall_seconds);
            task.profile.finished_on = Some(Utc::now());
            (task.noop, task.attempt, task.to_string())
        };
        execution.write_profile(done.task_id);

        if noop || done.exit_status == 0 {
            execution.set_task_status(done.task_id, TaskStatus::Successful);
        } else if attempt < max_attempts {
            execution.log().warn(&format!(
                "{} failed with exit status {} (attempt {}/{}), retrying",
                label, done.exit_status, attempt, max_attempts
            ));
            execution.set_task_status(done.task_id, TaskStatus::NoAttempt);
        } else {
            execution.log().error(&format!(
                "{} failed with exit status {} (attempt {}/{})",
                label, done.exit_status, attempt, max_attempts
            ));
            execution.set_task_status(done.task_id, TaskStatus::Failed);
        }
        handled.push(done.task_id);
    }
    handled
}

/// Applies one finished task to the queue.
fn handle_finished(execution: &mut Execution, task_queue: &mut TaskQueue, task_id: i32) {
    let Some((status, must_succeed)) = execution
        .task(task_id)
        .map(|t| (t.status, t.must_succeed))
    else {
        return;
    };
    match status {
        TaskStatus::Successful => {
            task_queue.remove(task_id);
            execution.note_task_finished(task_id);
        }
        TaskStatus::Failed if must_succeed => {
            let pruned = task_queue.remove_with_descendants(task_id);
            execution.note_task_finished(task_id);
            execution.set_execution_status(ExecutionStatus::FailedButRunning);
            execution.log().info(&format!(
                "Pruned {} descendant task(s); {} tasks left in the queue",
                pruned.len(),
                task_queue.len()
            ));
        }
        TaskStatus::Failed => {
            task_queue.remove(task_id);
            execution.note_task_finished(task_id);
        }
        TaskStatus::NoAttempt => {
            // Failed with attempts remaining; stays queued for redispatch.
            debug!("task {} queued for another attempt", task_id);
        }
        other => panic!(
            "unexpected finished task status {} for task {}",
            other, task_id
        ),
    }
}

/// Reaps and cancels everything in flight, then finalises the execution as
/// failed or killed. Used for SIGINT and the abnormal-return catch-all.
pub(crate) fn terminate_run(
    execution: &mut Execution,
    jobmanager: &mut JobManager,
    due_to_failure: bool,
) -> Result<(), ExecutionError> {
    execution.log().warn(&format!(
        "Terminating {}! Processing finished tasks and terminating {} running tasks",
        execution.name(),
        jobmanager.running_count()
    ));

    // Drain reapable completions once so finished work is recorded.
    process_finished(execution, jobmanager);

    for task_id in jobmanager.terminate() {
        execution.set_task_status(task_id, TaskStatus::Killed);
    }

    let final_stage_status = if due_to_failure {
        StageStatus::Failed
    } else {
        StageStatus::Killed
    };
    let unfinished: Vec<i32> = execution
        .stages()
        .filter(|s| {
            matches!(
                s.status,
                StageStatus::Running | StageStatus::RunningButFailed
            )
        })
        .map(|s| s.id)
        .collect();
    for stage_id in unfinished {
        execution.set_stage_status(stage_id, final_stage_status);
    }

    if due_to_failure {
        execution.set_execution_status(ExecutionStatus::Failed);
    } else {
        execution.set_execution_status(ExecutionStatus::Killed);
    }
    execution.commit()?;
    Ok(())
}
