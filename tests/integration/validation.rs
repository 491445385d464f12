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

//! Graph construction and configuration failures.

use std::path::PathBuf;

use serial_test::serial;

use sluice::{
    tags, ConfigurationError, ExecutionError, InputMap, OutputMap, Params, Recipe, RunOptions,
    Sluice, StartOptions, Tags, TaskFile, Tool, ToolError, ToolInvocation, ValidationError,
};

use crate::fixtures::{test_app, Echo, Sleepy};

#[tokio::test]
#[serial]
async fn duplicate_tags_are_rejected_before_persisting() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let mut ex = app
        .start(StartOptions::new("dups", dir.path().join("out")))
        .unwrap();

    let err = ex
        .add(
            None,
            vec![
                ToolInvocation::source(Echo::new("same")),
                ToolInvocation::source(Echo::new("same")),
            ],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Validation(ValidationError::DuplicateTags { .. })
    ));

    // Nothing was persisted: a reload sees no stages.
    let reloaded = app
        .start(StartOptions::new("dups", dir.path().join("out")))
        .unwrap();
    assert_eq!(reloaded.stages().count(), 0);
}

#[tokio::test]
#[serial]
async fn cross_execution_parents_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let mut first = app
        .start(StartOptions::new("first", dir.path().join("out1")))
        .unwrap();
    let ids = first
        .add(None, vec![ToolInvocation::source(Echo::new("a"))])
        .unwrap();

    let mut second = app
        .start(StartOptions::new("second", dir.path().join("out2")))
        .unwrap();
    let err = second
        .add(
            None,
            vec![ToolInvocation::with_parents(Echo::new("b"), vec![ids[0]])],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Validation(ValidationError::CrossExecutionParent { .. })
    ));
}

#[tokio::test]
#[serial]
async fn unknown_input_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    struct WantsBam {
        tags: Tags,
    }
    impl Tool for WantsBam {
        fn name(&self) -> &str {
            "WantsBam"
        }
        fn tags(&self) -> &Tags {
            &self.tags
        }
        fn inputs(&self) -> Vec<sluice::InputSpec> {
            vec!["bam".into()]
        }
        fn cmd(
            &self,
            _i: &InputMap,
            _o: &OutputMap,
            _p: &Params,
        ) -> Result<String, ToolError> {
            Ok("true".to_string())
        }
    }

    let mut ex = app
        .start(StartOptions::new("inputs", dir.path().join("out")))
        .unwrap();
    let ids = ex
        .add(None, vec![ToolInvocation::source(Echo::new("a"))])
        .unwrap();
    let err = ex
        .add(
            None,
            vec![ToolInvocation::with_parents(
                Box::new(WantsBam { tags: tags! {} }),
                vec![ids[0]],
            )],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Validation(ValidationError::UnknownInput { .. })
    ));
}

#[tokio::test]
#[serial]
async fn duplicate_output_paths_fail_preflight() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let shared = dir.path().join("shared.txt");

    struct FixedOut {
        tags: Tags,
        path: PathBuf,
    }
    impl Tool for FixedOut {
        fn name(&self) -> &str {
            "FixedOut"
        }
        fn tags(&self) -> &Tags {
            &self.tags
        }
        fn fixed_outputs(&self) -> Vec<TaskFile> {
            vec![TaskFile {
                id: None,
                name: "txt".to_string(),
                basename: "shared.txt".to_string(),
                path: self.path.clone(),
                persist: false,
                duplicate_ok: false,
                task_id: 0,
            }]
        }
        fn cmd(
            &self,
            _i: &InputMap,
            _o: &OutputMap,
            _p: &Params,
        ) -> Result<String, ToolError> {
            Ok("true".to_string())
        }
    }

    let mut ex = app
        .start(StartOptions::new("dup-paths", dir.path().join("out")))
        .unwrap();
    ex.add(
        None,
        vec![
            ToolInvocation::source(Box::new(FixedOut {
                tags: tags! { "n" => 1 },
                path: shared.clone(),
            })),
            ToolInvocation::source(Box::new(FixedOut {
                tags: tags! { "n" => 2 },
                path: shared.clone(),
            })),
        ],
    )
    .unwrap();

    let err = ex.run(RunOptions::default()).await.unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Validation(ValidationError::DuplicateOutputPath { .. })
    ));
}

#[tokio::test]
#[serial]
async fn cpu_req_over_budget_fails_preflight() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let mut recipe = Recipe::new();
    recipe.add_source(vec![Sleepy::new(1, 8)], None);

    let mut ex = app
        .start(StartOptions::new("cpus", dir.path().join("out")).max_cpus(4))
        .unwrap();
    ex.expand(recipe).unwrap();
    let err = ex.run(RunOptions::default()).await.unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Validation(ValidationError::CpuReqExceedsMax {
            cpu_req: 8,
            max_cpus: 4,
            ..
        })
    ));
}

#[test]
#[serial]
fn execution_names_are_restricted() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let err = app
        .start(StartOptions::new("bad name!", dir.path().join("out")))
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Validation(ValidationError::InvalidName(_))
    ));
}

#[test]
#[serial]
fn unknown_drm_is_fatal_at_construction() {
    let err = Sluice::new(Some(":memory:"), "slurm", None).unwrap_err();
    assert!(matches!(err, ConfigurationError::UnsupportedDrm(_)));
}

#[test]
#[serial]
fn reserved_tag_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let mut ex = app
        .start(StartOptions::new("reserved", dir.path().join("out")))
        .unwrap();
    let err = ex
        .add(
            None,
            vec![ToolInvocation::source(Echo::with_tags(
                tags! { "inputs" => "x" },
            ))],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Validation(ValidationError::ReservedTagKey(_))
    ));
}
