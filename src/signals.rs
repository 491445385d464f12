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

//! Status transition signals.
//!
//! The [`StatusBus`] is an in-process, synchronous publish/subscribe channel
//! keyed by entity kind. Handlers fire on the scheduler thread immediately
//! after the status field has been mutated and before the enclosing store
//! commit, in registration order. Delivery is best-effort and not durable.

use crate::status::{ExecutionStatus, StageStatus, TaskStatus};

/// A task status transition.
#[derive(Debug, Clone)]
pub struct TaskTransition {
    pub task_id: i32,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// A stage status transition.
#[derive(Debug, Clone)]
pub struct StageTransition {
    pub stage_id: i32,
    pub stage_name: String,
    pub from: StageStatus,
    pub to: StageStatus,
}

/// An execution status transition.
#[derive(Debug, Clone)]
pub struct ExecutionTransition {
    pub execution_name: String,
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

type Handler<E> = Box<dyn Fn(&E) + Send>;

/// Synchronous pub/sub for status changes on tasks, stages and executions.
#[derive(Default)]
pub struct StatusBus {
    task_handlers: Vec<Handler<TaskTransition>>,
    stage_handlers: Vec<Handler<StageTransition>>,
    execution_handlers: Vec<Handler<ExecutionTransition>>,
}

impl std::fmt::Debug for StatusBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBus")
            .field("task_handlers", &self.task_handlers.len())
            .field("stage_handlers", &self.stage_handlers.len())
            .field("execution_handlers", &self.execution_handlers.len())
            .finish()
    }
}

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to task transitions.
    pub fn on_task<F>(&mut self, handler: F)
    where
        F: Fn(&TaskTransition) + Send + 'static,
    {
        self.task_handlers.push(Box::new(handler));
    }

    /// Subscribes to stage transitions.
    pub fn on_stage<F>(&mut self, handler: F)
    where
        F: Fn(&StageTransition) + Send + 'static,
    {
        self.stage_handlers.push(Box::new(handler));
    }

    /// Subscribes to execution transitions.
    pub fn on_execution<F>(&mut self, handler: F)
    where
        F: Fn(&ExecutionTransition) + Send + 'static,
    {
        self.execution_handlers.push(Box::new(handler));
    }

    pub(crate) fn publish_task(&self, transition: &TaskTransition) {
        for handler in &self.task_handlers {
            handler(transition);
        }
    }

    pub(crate) fn publish_stage(&self, transition: &StageTransition) {
        for handler in &self.stage_handlers {
            handler(transition);
        }
    }

    pub(crate) fn publish_execution(&self, transition: &ExecutionTransition) {
        for handler in &self.execution_handlers {
            handler(transition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn handlers_fire_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = StatusBus::new();

        for label in ["first", "second"] {
            let seen = Arc::clone(&seen);
            bus.on_task(move |t| {
                seen.lock().unwrap().push((label, t.to));
            });
        }

        bus.publish_task(&TaskTransition {
            task_id: 1,
            from: TaskStatus::NoAttempt,
            to: TaskStatus::Submitted,
        });

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("first", TaskStatus::Submitted),
                ("second", TaskStatus::Submitted)
            ]
        );
    }

    #[test]
    fn kinds_are_independent() {
        let count = Arc::new(Mutex::new(0));
        let mut bus = StatusBus::new();
        {
            let count = Arc::clone(&count);
            bus.on_execution(move |_| *count.lock().unwrap() += 1);
        }

        bus.publish_stage(&StageTransition {
            stage_id: 1,
            stage_name: "s".to_string(),
            from: StageStatus::NoAttempt,
            to: StageStatus::Running,
        });
        assert_eq!(*count.lock().unwrap(), 0);

        bus.publish_execution(&ExecutionTransition {
            execution_name: "e".to_string(),
            from: ExecutionStatus::NoAttempt,
            to: ExecutionStatus::Running,
        });
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
