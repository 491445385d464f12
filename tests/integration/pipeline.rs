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

//! End-to-end pipeline scenarios on the local DRM.

use std::sync::{Arc, Mutex};

use serial_test::serial;

use sluice::{
    tags, ExecutionStatus, Recipe, Relation, RunOptions, StageStatus, StartOptions, TaskStatus,
};

use crate::fixtures::{test_app, Cat, Echo, Fail, Flaky, Ok0, Sleepy};

#[tokio::test]
#[serial]
async fn two_source_fan_in() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let out = dir.path().join("out");

    let mut recipe = Recipe::new();
    let echo = recipe.add_source(vec![Echo::new("hello"), Echo::new("world")], None);
    recipe.add_stage("Cat", Box::new(Cat::factory), &[echo], Relation::Many2one(vec![]));

    let mut ex = app
        .start(StartOptions::new("test", &out).max_cpus(1))
        .unwrap();
    ex.expand(recipe).unwrap();

    let submissions: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let submissions = Arc::clone(&submissions);
        ex.bus_mut().on_task(move |t| {
            if t.to == TaskStatus::Submitted {
                submissions.lock().unwrap().push(t.task_id);
            }
        });
    }

    let ok = ex.run(RunOptions::default()).await.unwrap();
    assert!(ok);
    assert_eq!(ex.status(), ExecutionStatus::Successful);
    assert!(ex.successful());

    // Echo(hello), Echo(world), then Cat: ascending (cpu_req, id).
    let echo_ids: Vec<i32> = ex.get_stage("Echo").unwrap().task_ids.clone();
    let cat_ids: Vec<i32> = ex.get_stage("Cat").unwrap().task_ids.clone();
    assert_eq!(
        *submissions.lock().unwrap(),
        vec![echo_ids[0], echo_ids[1], cat_ids[0]]
    );

    // Stage numbering is topological and 1-based.
    assert_eq!(ex.get_stage("Echo").unwrap().number, Some(1));
    assert_eq!(ex.get_stage("Cat").unwrap().number, Some(2));
    assert_eq!(ex.get_stage("Echo").unwrap().status, StageStatus::Successful);
    assert_eq!(ex.get_stage("Cat").unwrap().status, StageStatus::Successful);

    // Default log layout carries stage name and task id, and captured the
    // echoed words.
    let hello = std::fs::read_to_string(
        out.join("log").join("Echo").join(echo_ids[0].to_string()).join("stdout"),
    )
    .unwrap();
    assert_eq!(hello, "hello\n");
    let world = std::fs::read_to_string(
        out.join("log").join("Echo").join(echo_ids[1].to_string()).join("stdout"),
    )
    .unwrap();
    assert_eq!(world, "world\n");

    // The fan-in consumed both outputs.
    let cat = ex.task(cat_ids[0]).unwrap();
    assert_eq!(cat.parents.len(), 2);
    let cat_out = std::fs::read_to_string(&cat.output("cat").unwrap().path).unwrap();
    assert_eq!(cat_out, "hello\nworld\n");
}

#[tokio::test]
#[serial]
async fn one_to_many_expansion() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let mut recipe = Recipe::new();
    let echo = recipe.add_source(vec![Echo::new("hi")], None);
    recipe.add_stage(
        "Cat",
        Box::new(Cat::factory),
        &[echo],
        Relation::One2many(vec![("n".to_string(), vec![1.into(), 2.into()])]),
    );

    let mut ex = app
        .start(StartOptions::new("one2many", dir.path().join("out")))
        .unwrap();
    ex.expand(recipe).unwrap();

    let ok = ex.run(RunOptions::default()).await.unwrap();
    assert!(ok);

    let cat = ex.get_stage("Cat").unwrap();
    assert_eq!(cat.number, Some(2));
    assert_eq!(cat.task_ids.len(), 2);
    let expected = [tags! { "word" => "hi", "n" => 1 }, tags! { "word" => "hi", "n" => 2 }];
    for (id, want) in cat.task_ids.iter().zip(expected.iter()) {
        let task = ex.task(*id).unwrap();
        assert_eq!(&task.tags, want);
        assert_eq!(task.status, TaskStatus::Successful);
    }
}

#[tokio::test]
#[serial]
async fn cpu_budget_serialises_wide_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let mut recipe = Recipe::new();
    recipe.add_source(
        vec![Sleepy::new(1, 2), Sleepy::new(2, 2), Sleepy::new(3, 2)],
        None,
    );

    let mut ex = app
        .start(StartOptions::new("budget", dir.path().join("out")).max_cpus(3))
        .unwrap();
    ex.expand(recipe).unwrap();

    let started = std::time::Instant::now();
    let ok = ex.run(RunOptions::default()).await.unwrap();
    assert!(ok);
    // Three serialised 0.4s sleeps cannot beat 1.2s of wall clock.
    assert!(started.elapsed().as_secs_f64() >= 1.2);

    // With cpu_req 2 against max_cpus 3, no two execution windows overlap.
    let mut windows: Vec<_> = ex
        .get_stage("Sleepy")
        .unwrap()
        .task_ids
        .iter()
        .map(|id| {
            let profile = &ex.task(*id).unwrap().profile;
            (profile.submitted_on.unwrap(), profile.finished_on.unwrap())
        })
        .collect();
    windows.sort();
    for pair in windows.windows(2) {
        assert!(
            pair[1].0 >= pair[0].1,
            "tasks overlapped: {:?} vs {:?}",
            pair[0],
            pair[1]
        );
    }
}

#[tokio::test]
#[serial]
async fn retry_then_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let mut recipe = Recipe::new();
    recipe.add_source(vec![Flaky::new(&dir.path().join("marker"))], None);

    let mut ex = app
        .start(StartOptions::new("flaky", dir.path().join("out")).max_attempts(2))
        .unwrap();
    ex.expand(recipe).unwrap();

    let ok = ex.run(RunOptions::default()).await.unwrap();
    assert!(ok);
    assert_eq!(ex.status(), ExecutionStatus::Successful);

    let flaky_id = ex.get_stage("Flaky").unwrap().task_ids[0];
    let task = ex.task(flaky_id).unwrap();
    assert_eq!(task.status, TaskStatus::Successful);
    // Two submissions: failed once, then succeeded.
    assert_eq!(task.attempt, 2);
    assert_eq!(task.profile.exit_status, Some(0));
}

#[tokio::test]
#[serial]
async fn dry_run_prepares_but_submits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let mut recipe = Recipe::new();
    recipe.add_source(vec![Echo::new("dry")], None);

    let mut ex = app
        .start(StartOptions::new("dry", dir.path().join("out")))
        .unwrap();
    ex.expand(recipe).unwrap();

    let ok = ex
        .run(RunOptions {
            dry: true,
            ..RunOptions::default()
        })
        .await
        .unwrap();
    assert!(ok);

    let id = ex.get_stage("Echo").unwrap().task_ids[0];
    let task = ex.task(id).unwrap();
    // Pre-flight ran: command and log dir assigned, stage numbered.
    assert!(task.command.is_some());
    assert!(task.log_dir.is_some());
    assert_eq!(ex.get_stage("Echo").unwrap().number, Some(1));
    // But nothing was submitted.
    assert_eq!(task.status, TaskStatus::NoAttempt);
    assert_eq!(task.attempt, 0);
}

#[tokio::test]
#[serial]
async fn fatal_failure_prunes_descendants() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let mut recipe = Recipe::new();
    let a = recipe.add_source(vec![Fail::new(tags! { "sample" => "a" })], None);
    let b = recipe.add_stage("B", Box::new(Ok0::factory), &[a], Relation::One2one);
    recipe.add_stage("C", Box::new(Ok0::factory), &[b], Relation::One2one);

    let mut ex = app
        .start(StartOptions::new("prune", dir.path().join("out")))
        .unwrap();
    ex.expand(recipe).unwrap();

    let ok = ex.run(RunOptions::default()).await.unwrap();
    assert!(!ok);
    assert_eq!(ex.status(), ExecutionStatus::Failed);
    assert!(!ex.successful());

    let a_id = ex.get_stage("Fail").unwrap().task_ids[0];
    let b_id = ex.get_stage("B").unwrap().task_ids[0];
    let c_id = ex.get_stage("C").unwrap().task_ids[0];

    assert_eq!(ex.task(a_id).unwrap().status, TaskStatus::Failed);
    assert_eq!(ex.task(a_id).unwrap().profile.exit_status, Some(1));
    // Descendants were never submitted.
    assert_eq!(ex.task(b_id).unwrap().status, TaskStatus::NoAttempt);
    assert_eq!(ex.task(b_id).unwrap().attempt, 0);
    assert_eq!(ex.task(c_id).unwrap().status, TaskStatus::NoAttempt);
    assert_eq!(ex.task(c_id).unwrap().attempt, 0);

    assert_eq!(ex.get_stage("Fail").unwrap().status, StageStatus::Failed);

    // Mixed prune: a grouped stage where one branch is pruned while the
    // other succeeds. The stage was started and can never complete, so it
    // finalises as failed rather than dangling in a running state.
    let mut recipe = Recipe::new();
    let src = recipe.add_source(
        vec![
            Fail::new(tags! { "sample" => "a" }),
            Ok0::factory(tags! { "sample" => "b" }),
        ],
        Some("Src"),
    );
    recipe.add_stage(
        "Merge",
        Box::new(Ok0::factory),
        &[src],
        Relation::Many2one(vec!["sample".to_string()]),
    );

    let mut ex = app
        .start(StartOptions::new("prune-mixed", dir.path().join("out2")))
        .unwrap();
    ex.expand(recipe).unwrap();

    let ok = ex.run(RunOptions::default()).await.unwrap();
    assert!(!ok);
    assert_eq!(ex.status(), ExecutionStatus::Failed);

    assert_eq!(ex.get_stage("Src").unwrap().status, StageStatus::Failed);
    let merge = ex.get_stage("Merge").unwrap();
    assert_eq!(merge.status, StageStatus::Failed);

    // The sample=b branch ran to completion; the sample=a branch was pruned
    // before ever being submitted.
    for id in &merge.task_ids {
        let task = ex.task(*id).unwrap();
        if task.tags == tags! { "sample" => "a" } {
            assert_eq!(task.status, TaskStatus::NoAttempt);
            assert_eq!(task.attempt, 0);
        } else {
            assert_eq!(task.tags, tags! { "sample" => "b" });
            assert_eq!(task.status, TaskStatus::Successful);
        }
    }
}
