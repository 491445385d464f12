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

//! Resumption and persistence round-trips.

use serial_test::serial;

use sluice::{
    ExecutionStatus, Recipe, Relation, RunOptions, StartOptions, TaskStatus,
};

use crate::fixtures::{test_app, Cat, Echo};

/// A run is killed after its first task succeeds; restarting with the same
/// name adopts the successful task and only runs the remainder.
#[tokio::test]
#[serial]
async fn resume_after_kill() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let out = dir.path().join("out");

    // First attempt: only Echo(hello) gets to run before the kill.
    let mut recipe = Recipe::new();
    recipe.add_source(vec![Echo::new("hello")], None);

    let mut ex = app
        .start(StartOptions::new("resume", &out))
        .unwrap();
    ex.expand(recipe).unwrap();
    let ok = ex
        .run(RunOptions {
            set_successful: false,
            ..RunOptions::default()
        })
        .await
        .unwrap();
    assert!(ok);

    let hello_id = ex.get_stage("Echo").unwrap().task_ids[0];
    let hello_attempt = ex.task(hello_id).unwrap().attempt;
    assert_eq!(ex.task(hello_id).unwrap().status, TaskStatus::Successful);

    ex.terminate(false).unwrap();
    assert_eq!(ex.status(), ExecutionStatus::Killed);

    // Second attempt: full recipe, same name, restart.
    let mut recipe = Recipe::new();
    let echo = recipe.add_source(vec![Echo::new("hello"), Echo::new("world")], None);
    recipe.add_stage("Cat", Box::new(Cat::factory), &[echo], Relation::Many2one(vec![]));

    let mut ex = app
        .start(
            StartOptions::new("resume", &out)
                .restart(true)
                .skip_confirm(true),
        )
        .unwrap();

    // The killed run's successful task survived with its id and status.
    let adopted = ex.task(hello_id).unwrap();
    assert_eq!(adopted.status, TaskStatus::Successful);

    ex.expand(recipe).unwrap();
    let ok = ex.run(RunOptions::default()).await.unwrap();
    assert!(ok);
    assert_eq!(ex.status(), ExecutionStatus::Successful);

    // Not resubmitted: the attempt counter is untouched.
    let adopted = ex.task(hello_id).unwrap();
    assert_eq!(adopted.status, TaskStatus::Successful);
    assert_eq!(adopted.attempt, hello_attempt);

    // The new work ran.
    let echo_stage = ex.get_stage("Echo").unwrap();
    assert_eq!(echo_stage.task_ids.len(), 2);
    let cat_id = ex.get_stage("Cat").unwrap().task_ids[0];
    let cat = ex.task(cat_id).unwrap();
    assert_eq!(cat.status, TaskStatus::Successful);
    assert_eq!(cat.parents.len(), 2);
    assert!(cat.parents.contains(&hello_id));
}

/// Restart deletes non-successful tasks and their non-persist files while
/// successful tasks and their stages are preserved verbatim.
#[tokio::test]
#[serial]
async fn restart_deletes_only_unsuccessful_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let out = dir.path().join("out");

    let mut recipe = Recipe::new();
    recipe.add_source(vec![Echo::new("keep")], None);
    let mut ex = app.start(StartOptions::new("restart", &out)).unwrap();
    ex.expand(recipe).unwrap();
    ex.run(RunOptions {
        set_successful: false,
        ..RunOptions::default()
    })
    .await
    .unwrap();
    let keep_id = ex.get_stage("Echo").unwrap().task_ids[0];
    let keep_out = ex
        .task(keep_id)
        .unwrap()
        .output("txt")
        .unwrap()
        .path
        .clone();
    ex.terminate(false).unwrap();

    // Second attempt adds a task that never runs (terminated immediately),
    // leaving it no_attempt in the store.
    let mut recipe = Recipe::new();
    recipe.add_source(vec![Echo::new("keep"), Echo::new("doomed")], None);
    let mut ex = app
        .start(
            StartOptions::new("restart", &out)
                .restart(true)
                .skip_confirm(true),
        )
        .unwrap();
    ex.expand(recipe).unwrap();
    let doomed_id = ex
        .get_stage("Echo")
        .unwrap()
        .task_ids
        .iter()
        .copied()
        .find(|id| *id != keep_id)
        .unwrap();
    ex.terminate(false).unwrap();

    // Third start with restart drops the unsuccessful task.
    let ex = app
        .start(
            StartOptions::new("restart", &out)
                .restart(true)
                .skip_confirm(true),
        )
        .unwrap();
    assert!(ex.task(keep_id).is_some());
    assert!(ex.task(doomed_id).is_none());
    assert_eq!(ex.get_stage("Echo").unwrap().task_ids, vec![keep_id]);
    // The successful task's artifact is still on disk.
    assert!(keep_out.exists());
}

/// Round-trip: reopening an execution without restart reconstructs the same
/// DAG.
#[tokio::test]
#[serial]
async fn reload_reconstructs_the_graph() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let out = dir.path().join("out");

    let mut recipe = Recipe::new();
    let echo = recipe.add_source(vec![Echo::new("hello"), Echo::new("world")], None);
    recipe.add_stage(
        "Cat",
        Box::new(Cat::factory),
        &[echo],
        Relation::One2many(vec![("n".to_string(), vec![1.into(), 2.into()])]),
    );

    let mut original = app.start(StartOptions::new("roundtrip", &out)).unwrap();
    original.expand(recipe).unwrap();

    let reloaded = app.start(StartOptions::new("roundtrip", &out)).unwrap();

    let original_stages: Vec<_> = original
        .stages()
        .map(|s| (s.id, s.name.clone(), s.task_ids.clone(), s.parents.clone()))
        .collect();
    let reloaded_stages: Vec<_> = reloaded
        .stages()
        .map(|s| (s.id, s.name.clone(), s.task_ids.clone(), s.parents.clone()))
        .collect();
    assert_eq!(original_stages, reloaded_stages);

    for task in original.tasks() {
        let other = reloaded.task(task.id).unwrap();
        assert_eq!(task.tags, other.tags);
        assert_eq!(task.status, other.status);
        assert_eq!(task.cpu_req, other.cpu_req);
        assert_eq!(task.parents, other.parents);
        let paths: Vec<_> = task.output_files.iter().map(|f| f.path.clone()).collect();
        let other_paths: Vec<_> = other.output_files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(paths, other_paths);
    }
}

/// Deleting an execution removes its rows; files go only when asked.
#[tokio::test]
#[serial]
async fn delete_cascades() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let out = dir.path().join("out");

    let mut recipe = Recipe::new();
    recipe.add_source(vec![Echo::new("gone")], None);
    let mut ex = app.start(StartOptions::new("doomed", &out)).unwrap();
    ex.expand(recipe).unwrap();
    ex.run(RunOptions::default()).await.unwrap();

    ex.delete(true).unwrap();
    assert!(!out.exists());

    // The name is free again and opens an empty execution.
    let ex = app.start(StartOptions::new("doomed", &out)).unwrap();
    assert_eq!(ex.stages().count(), 0);
    assert_eq!(ex.status(), ExecutionStatus::NoAttempt);
}
