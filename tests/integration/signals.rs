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

//! Status bus coupling across a real run.

use std::sync::{Arc, Mutex};

use serial_test::serial;

use sluice::{ExecutionStatus, Recipe, RunOptions, StageStatus, StartOptions, TaskStatus};

use crate::fixtures::{test_app, Echo};

#[tokio::test]
#[serial]
async fn transitions_are_published_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let mut recipe = Recipe::new();
    recipe.add_source(vec![Echo::new("signal")], None);

    let mut ex = app
        .start(StartOptions::new("signals", dir.path().join("out")))
        .unwrap();
    ex.expand(recipe).unwrap();

    let task_events: Arc<Mutex<Vec<(TaskStatus, TaskStatus)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let stage_events: Arc<Mutex<Vec<(StageStatus, StageStatus)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let execution_events: Arc<Mutex<Vec<(ExecutionStatus, ExecutionStatus)>>> =
        Arc::new(Mutex::new(Vec::new()));

    {
        let task_events = Arc::clone(&task_events);
        ex.bus_mut().on_task(move |t| {
            task_events.lock().unwrap().push((t.from, t.to));
        });
        let stage_events = Arc::clone(&stage_events);
        ex.bus_mut().on_stage(move |t| {
            stage_events.lock().unwrap().push((t.from, t.to));
        });
        let execution_events = Arc::clone(&execution_events);
        ex.bus_mut().on_execution(move |t| {
            execution_events.lock().unwrap().push((t.from, t.to));
        });
    }

    let ok = ex.run(RunOptions::default()).await.unwrap();
    assert!(ok);

    assert_eq!(
        *task_events.lock().unwrap(),
        vec![
            (TaskStatus::NoAttempt, TaskStatus::Waiting),
            (TaskStatus::Waiting, TaskStatus::Submitted),
            (TaskStatus::Submitted, TaskStatus::Successful),
        ]
    );
    assert_eq!(
        *stage_events.lock().unwrap(),
        vec![
            (StageStatus::NoAttempt, StageStatus::Running),
            (StageStatus::Running, StageStatus::Successful),
        ]
    );
    assert_eq!(
        *execution_events.lock().unwrap(),
        vec![
            (ExecutionStatus::NoAttempt, ExecutionStatus::Running),
            (ExecutionStatus::Running, ExecutionStatus::Successful),
        ]
    );

    // The engine's own subscription stamped the terminal bookkeeping before
    // the final commit.
    assert!(ex.successful());
    assert!(ex.finished_on().is_some());
    assert_eq!(ex.get_stage("Echo").unwrap().successful, true);
    assert!(ex.get_stage("Echo").unwrap().finished_on.is_some());
}
