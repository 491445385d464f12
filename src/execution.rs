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

//! # Executions
//!
//! An [`Execution`] is a single named invocation of a recipe. It owns the
//! in-memory aggregate (stages, tasks, task files, both edge sets), the
//! graph builder (`add`/`expand`), dirty-entity tracking with transactional
//! commit, and the run lifecycle.
//!
//! Graph construction validates before it persists: a failed batch writes no
//! rows. An accepted batch persists atomically (stage, tasks, files, edges)
//! and assigns row ids, so `log/<stage>/<task_id>` layout and deterministic
//! scheduling tie-breaks are stable from that point on.
//!
//! Status mutations flow through the `set_*_status` methods, which publish
//! on the [`StatusBus`] after the field changes and before the next commit.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::dal::DAL;
use crate::error::{ExecutionError, StoreError, ValidationError};
use crate::graph::{topological_order, TaskQueue};
use crate::job::JobManager;
use crate::logging::ExecutionLog;
use crate::models::{NewStage, NewTask, NewTaskFile};
use crate::recipe::{expand_relation, Recipe, StageKind};
use crate::scheduler;
use crate::signals::{ExecutionTransition, StageTransition, StatusBus, TaskTransition};
use crate::stage::Stage;
use crate::status::{ExecutionStatus, StageStatus, TaskStatus};
use crate::tags::{format_tags, Tags};
use crate::task::Task;
use crate::tool::{
    generate_command, generate_task, GenerateContext, Params, Settings, Tool,
    RESERVED_PARAM_NAMES,
};

/// One entry of an `add` batch: a tool and the ids of its parent tasks.
pub struct ToolInvocation {
    pub tool: Box<dyn Tool>,
    pub parents: Vec<i32>,
}

impl ToolInvocation {
    pub fn source(tool: Box<dyn Tool>) -> Self {
        Self {
            tool,
            parents: Vec::new(),
        }
    }

    pub fn with_parents(tool: Box<dyn Tool>, parents: Vec<i32>) -> Self {
        Self { tool, parents }
    }
}

/// Options for [`Execution::run`].
pub struct RunOptions {
    /// Computes a task's log directory. Defaults to
    /// `<output_dir>/log/<stage>/<task_id>`.
    pub log_output_dir: Option<Box<dyn Fn(&Task) -> PathBuf + Send>>,
    /// Prepare everything but submit nothing.
    pub dry: bool,
    /// Mark the execution successful when the queue drains cleanly. Set to
    /// false to add and run more tasks later.
    pub set_successful: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            log_output_dir: None,
            dry: false,
            set_successful: true,
        }
    }
}

/// A single named run of a pipeline: the top-level aggregate.
pub struct Execution {
    pub(crate) id: i32,
    name: String,
    output_dir: PathBuf,
    max_cpus: Option<u32>,
    max_attempts: u32,
    created_on: Option<DateTime<Utc>>,
    started_on: Option<DateTime<Utc>>,
    finished_on: Option<DateTime<Utc>>,
    successful: bool,
    status: ExecutionStatus,
    info: BTreeMap<String, Value>,
    /// Stage ids in creation order.
    stage_order: Vec<i32>,
    stages: BTreeMap<i32, Stage>,
    tasks: BTreeMap<i32, Task>,
    /// Tool bound to each task added in this process; needed to render
    /// commands for fresh tasks. Hydrated tasks keep their stored command.
    tools: HashMap<i32, Box<dyn Tool>>,
    /// Per-stage command parameters, keyed by stage id.
    parameters: HashMap<i32, Params>,
    settings: Settings,
    bus: StatusBus,
    store: DAL,
    drm: String,
    default_queue: Option<String>,
    log: ExecutionLog,
    dirty_exec: bool,
    dirty_stages: BTreeSet<i32>,
    dirty_tasks: BTreeSet<i32>,
}

impl fmt::Display for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Execution[{}] {}>", self.id, self.name)
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("stages", &self.stage_order.len())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

#[allow(clippy::too_many_arguments)]
impl Execution {
    pub(crate) fn new(
        id: i32,
        name: String,
        output_dir: PathBuf,
        max_cpus: Option<u32>,
        max_attempts: u32,
        created_on: Option<DateTime<Utc>>,
        started_on: Option<DateTime<Utc>>,
        finished_on: Option<DateTime<Utc>>,
        successful: bool,
        status: ExecutionStatus,
        info: BTreeMap<String, Value>,
        store: DAL,
        drm: String,
        default_queue: Option<String>,
        settings: Settings,
        log: ExecutionLog,
    ) -> Self {
        Self {
            id,
            name,
            output_dir,
            max_cpus,
            max_attempts,
            created_on,
            started_on,
            finished_on,
            successful,
            status,
            info,
            stage_order: Vec::new(),
            stages: BTreeMap::new(),
            tasks: BTreeMap::new(),
            tools: HashMap::new(),
            parameters: HashMap::new(),
            settings,
            bus: StatusBus::new(),
            store,
            drm,
            default_queue,
            log,
            dirty_exec: false,
            dirty_stages: BTreeSet::new(),
            dirty_tasks: BTreeSet::new(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn successful(&self) -> bool {
        self.successful
    }

    pub fn max_cpus(&self) -> Option<u32> {
        self.max_cpus
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn created_on(&self) -> Option<DateTime<Utc>> {
        self.created_on
    }

    pub fn started_on(&self) -> Option<DateTime<Utc>> {
        self.started_on
    }

    pub fn finished_on(&self) -> Option<DateTime<Utc>> {
        self.finished_on
    }

    /// Free-form key/value bag, persisted as JSON. Owned by the caller
    /// outside of `run()`.
    pub fn info(&self) -> &BTreeMap<String, Value> {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut BTreeMap<String, Value> {
        self.dirty_exec = true;
        &mut self.info
    }

    /// Stages in creation order.
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stage_order.iter().filter_map(|id| self.stages.get(id))
    }

    /// Looks up a stage by name.
    pub fn get_stage(&self, name: &str) -> Result<&Stage, ValidationError> {
        self.stages
            .values()
            .find(|s| s.name == name)
            .ok_or_else(|| ValidationError::UnknownStage(name.to_string()))
    }

    pub fn stage_by_id(&self, id: i32) -> Option<&Stage> {
        self.stages.get(&id)
    }

    /// Tasks across all stages, in stage creation order then task id order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.stage_order
            .iter()
            .filter_map(|id| self.stages.get(id))
            .flat_map(|s| s.task_ids.iter())
            .filter_map(|id| self.tasks.get(id))
    }

    pub fn task(&self, id: i32) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub(crate) fn task_mut(&mut self, id: i32) -> Option<&mut Task> {
        self.dirty_tasks.insert(id);
        self.tasks.get_mut(&id)
    }

    /// Subscription point for status transitions.
    pub fn bus_mut(&mut self) -> &mut StatusBus {
        &mut self.bus
    }

    pub(crate) fn log(&self) -> &ExecutionLog {
        &self.log
    }

    // ------------------------------------------------------------------
    // Status transitions
    // ------------------------------------------------------------------

    pub(crate) fn set_task_status(&mut self, id: i32, to: TaskStatus) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        let from = task.status;
        if from == to {
            return;
        }
        task.status = to;
        self.dirty_tasks.insert(id);
        self.bus
            .publish_task(&TaskTransition { task_id: id, from, to });
    }

    pub(crate) fn set_stage_status(&mut self, id: i32, to: StageStatus) {
        let Some(stage) = self.stages.get_mut(&id) else {
            return;
        };
        let from = stage.status;
        if from == to {
            return;
        }
        stage.status = to;
        match to {
            StageStatus::Successful => {
                stage.successful = true;
                stage.finished_on = Some(Utc::now());
            }
            StageStatus::Failed | StageStatus::Killed => {
                stage.successful = false;
                stage.finished_on = Some(Utc::now());
            }
            StageStatus::Running => {
                stage.successful = false;
                stage.finished_on = None;
            }
            _ => {}
        }
        let name = stage.name.clone();
        self.dirty_stages.insert(id);
        self.bus.publish_stage(&StageTransition {
            stage_id: id,
            stage_name: name,
            from,
            to,
        });
    }

    pub(crate) fn set_execution_status(&mut self, to: ExecutionStatus) {
        let from = self.status;
        if from == to {
            return;
        }
        self.status = to;
        self.dirty_exec = true;

        // The engine's own subscription: stamp finished_on on terminal
        // transitions and the successful flag on success, before commit.
        if to.is_terminal() {
            self.finished_on = Some(Utc::now());
            let line = format!("{} {}, output_dir: {}", self, to, self.output_dir.display());
            if matches!(to, ExecutionStatus::Failed | ExecutionStatus::Killed) {
                self.log.warn(&line);
            } else {
                self.log.info(&line);
            }
        }
        if to == ExecutionStatus::Successful {
            self.successful = true;
        }

        self.bus.publish_execution(&ExecutionTransition {
            execution_name: self.name.clone(),
            from,
            to,
        });
    }

    /// Marks the stage running when its first task is handed to the DRM.
    pub(crate) fn note_task_submitted(&mut self, task_id: i32) {
        if let Some(stage_id) = self.tasks.get(&task_id).map(|t| t.stage_id) {
            if self
                .stages
                .get(&stage_id)
                .map(|s| s.status == StageStatus::NoAttempt)
                .unwrap_or(false)
            {
                self.set_stage_status(stage_id, StageStatus::Running);
            }
        }
    }

    /// Propagates a task's terminal status onto its stage: a permanent
    /// failure demotes the stage, the last success completes it.
    pub(crate) fn note_task_finished(&mut self, task_id: i32) {
        let Some(task) = self.tasks.get(&task_id) else {
            return;
        };
        let stage_id = task.stage_id;
        match task.status {
            TaskStatus::Failed => {
                self.set_stage_status(stage_id, StageStatus::RunningButFailed);
            }
            TaskStatus::Successful => {
                let complete = self
                    .stages
                    .get(&stage_id)
                    .map(|s| {
                        s.task_ids.iter().all(|id| {
                            self.tasks
                                .get(id)
                                .map(|t| t.successful())
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false);
                if complete {
                    self.set_stage_status(stage_id, StageStatus::Successful);
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Graph construction
    // ------------------------------------------------------------------

    /// Adds a batch of tools to the stage called `name` (created when
    /// missing), one task per tool. Existing tasks with identical tags are
    /// adopted instead of recreated; successful ones are preserved verbatim.
    ///
    /// Returns the task ids corresponding positionally to the batch.
    pub fn add(
        &mut self,
        name: Option<&str>,
        batch: Vec<ToolInvocation>,
    ) -> Result<Vec<i32>, ExecutionError> {
        let stage_name = name
            .map(str::to_string)
            .or_else(|| batch.first().map(|e| e.tool.name().to_string()))
            .ok_or(ValidationError::EmptyToolBatch {
                stage: "<unnamed>".to_string(),
            })?;

        if batch.is_empty() {
            return Err(ValidationError::EmptyToolBatch { stage: stage_name }.into());
        }

        // Validate before anything is persisted.
        let mut seen: BTreeSet<Tags> = BTreeSet::new();
        for entry in &batch {
            let tags = entry.tool.tags();
            for key in RESERVED_PARAM_NAMES {
                if tags.contains_key(key) {
                    return Err(ValidationError::ReservedTagKey(key.to_string()).into());
                }
            }
            if !seen.insert(tags.clone()) {
                let msg = format!(
                    "Duplicate tags detected: {} in stage '{}'",
                    format_tags(tags),
                    stage_name
                );
                self.log.error(&msg);
                return Err(ValidationError::DuplicateTags {
                    stage: stage_name,
                    tags: format_tags(tags),
                }
                .into());
            }
            for &parent in &entry.parents {
                if !self.tasks.contains_key(&parent) {
                    return Err(ValidationError::CrossExecutionParent { task_id: parent }.into());
                }
            }
        }

        let existing_stage_id = self
            .stages
            .values()
            .find(|s| s.name == stage_name)
            .map(|s| s.id);

        // Index of existing tasks by tag mapping: the reuse index.
        let reuse: HashMap<Tags, i32> = existing_stage_id
            .and_then(|id| self.stages.get(&id))
            .map(|stage| {
                stage
                    .task_ids
                    .iter()
                    .filter_map(|id| self.tasks.get(id).map(|t| (t.tags.clone(), t.id)))
                    .collect()
            })
            .unwrap_or_default();

        // Materialise drafts for the entries that need a fresh task.
        enum Planned {
            Adopted(i32),
            Fresh(Task),
        }
        let mut planned = Vec::with_capacity(batch.len());
        let mut batch_tools = Vec::with_capacity(batch.len());
        for entry in batch {
            let tags = entry.tool.tags().clone();
            if let Some(&existing) = reuse.get(&tags) {
                planned.push(Planned::Adopted(existing));
            } else {
                let parents: Vec<&Task> = entry
                    .parents
                    .iter()
                    .filter_map(|id| self.tasks.get(id))
                    .collect();
                let draft = generate_task(
                    entry.tool.as_ref(),
                    &GenerateContext {
                        stage_id: existing_stage_id.unwrap_or(0),
                        stage_name: &stage_name,
                        output_dir: &self.output_dir,
                        parents,
                    },
                    &self.settings,
                )?;
                planned.push(Planned::Fresh(draft));
            }
            batch_tools.push(entry.tool);
        }

        // Union of the parent stages contributed by fresh tasks.
        let mut new_parent_stage_ids: BTreeSet<i32> = BTreeSet::new();
        for p in &planned {
            if let Planned::Fresh(draft) = p {
                for parent in &draft.parents {
                    if let Some(parent_task) = self.tasks.get(parent) {
                        new_parent_stage_ids.insert(parent_task.stage_id);
                    }
                }
            }
        }

        // Persist the accepted batch in one transaction.
        let store = self.store.clone();
        let execution_id = self.id;
        let existing_parents: BTreeSet<i32> = existing_stage_id
            .and_then(|id| self.stages.get(&id))
            .map(|s| s.parents.iter().copied().collect())
            .unwrap_or_default();

        let (stage_id, inserted) = store.transaction(|conn| {
            let stage_id = match existing_stage_id {
                Some(id) => id,
                None => {
                    store
                        .stage()
                        .insert(
                            conn,
                            NewStage {
                                execution_id,
                                name: stage_name.clone(),
                                status: StageStatus::NoAttempt.as_str().to_string(),
                            },
                        )?
                        .id
                }
            };

            let mut inserted: Vec<(usize, Task)> = Vec::new();
            for (position, p) in planned.iter().enumerate() {
                let Planned::Fresh(draft) = p else {
                    continue;
                };
                let mut task = draft.clone();
                task.stage_id = stage_id;
                let row = store.task().insert(conn, NewTask::from_task(&task))?;
                task.id = row.id;
                for file in &mut task.output_files {
                    file.task_id = task.id;
                    let file_row = store
                        .task_file()
                        .insert(conn, NewTaskFile::from_file(task.id, file))?;
                    file.id = Some(file_row.id);
                }
                for &parent in &task.parents {
                    store.task().insert_edge(conn, parent, task.id)?;
                }
                inserted.push((position, task));
            }

            for &parent_stage in &new_parent_stage_ids {
                if parent_stage != stage_id && !existing_parents.contains(&parent_stage) {
                    store.stage().insert_edge(conn, parent_stage, stage_id)?;
                }
            }

            Ok((stage_id, inserted))
        })?;

        // The transaction succeeded; mirror it into the aggregate.
        if existing_stage_id.is_none() {
            let stage = Stage::new(stage_id, &stage_name);
            self.stages.insert(stage_id, stage);
            self.stage_order.push(stage_id);
        }

        let mut result: Vec<i32> = planned
            .iter()
            .map(|p| match p {
                Planned::Adopted(id) => *id,
                Planned::Fresh(_) => 0,
            })
            .collect();

        for (position, task) in inserted {
            result[position] = task.id;
            for &parent in &task.parents {
                if let Some(parent_task) = self.tasks.get_mut(&parent) {
                    parent_task.children.push(task.id);
                }
            }
            if let Some(stage) = self.stages.get_mut(&stage_id) {
                stage.task_ids.push(task.id);
            }
            self.tasks.insert(task.id, task);
        }

        if let Some(stage) = self.stages.get_mut(&stage_id) {
            for parent_stage in new_parent_stage_ids {
                if parent_stage != stage_id && !stage.parents.contains(&parent_stage) {
                    stage.parents.push(parent_stage);
                }
            }
        }

        // Rebind tools positionally so command generation can reach them.
        for (tool, &task_id) in batch_tools.into_iter().zip(result.iter()) {
            self.tools.insert(task_id, tool);
        }

        Ok(result)
    }

    /// Attaches command parameters to a stage for later command generation.
    pub fn set_stage_parameters(&mut self, stage_name: &str, parameters: Params) {
        if let Some(id) = self
            .stages
            .values()
            .find(|s| s.name == stage_name)
            .map(|s| s.id)
        {
            self.parameters.insert(id, parameters);
        }
    }

    /// Expands a recipe into concrete stages and tasks, walking the declared
    /// stages in order and driving [`Execution::add`] for each.
    pub fn expand(&mut self, recipe: Recipe) -> Result<(), ExecutionError> {
        // Recipe stage index -> engine stage name, for parent resolution.
        let mut stage_names: Vec<String> = Vec::with_capacity(recipe.stages.len());

        for recipe_stage in recipe.stages {
            let parameters = recipe_stage.parameters.clone();
            let batch: Vec<ToolInvocation> = match recipe_stage.kind {
                StageKind::Source { tools } => {
                    tools.into_iter().map(ToolInvocation::source).collect()
                }
                StageKind::Derived { factory, relation } => {
                    let mut parent_tasks: Vec<&Task> = Vec::new();
                    for parent_ref in &recipe_stage.parents {
                        let parent_name = &stage_names[parent_ref.0];
                        let stage = self.get_stage(parent_name)?;
                        for id in &stage.task_ids {
                            if let Some(t) = self.tasks.get(id) {
                                parent_tasks.push(t);
                            }
                        }
                    }
                    expand_relation(&relation, &parent_tasks, &recipe_stage.name)?
                        .into_iter()
                        .map(|expansion| ToolInvocation {
                            tool: factory(expansion.tags),
                            parents: expansion.parent_ids,
                        })
                        .collect()
                }
            };

            self.add(Some(&recipe_stage.name), batch)?;
            if !parameters.is_empty() {
                self.set_stage_parameters(&recipe_stage.name, parameters);
            }
            stage_names.push(recipe_stage.name);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Run lifecycle
    // ------------------------------------------------------------------

    /// Runs the scheduler over the non-successful frontier of the DAG.
    ///
    /// Returns `Ok(true)` when the queue drained cleanly (and the execution
    /// was marked successful if `set_successful`), `Ok(false)` when a
    /// must-succeed failure drained the queue, and an error on validation,
    /// store or termination failures.
    pub async fn run(&mut self, opts: RunOptions) -> Result<bool, ExecutionError> {
        self.log.info(&format!(
            "Preparing to run {} using DRM `{}`, output_dir: `{}`",
            self,
            self.drm,
            self.output_dir.display()
        ));

        let mut jobmanager = JobManager::new(&self.drm, self.default_queue.clone())?;

        self.set_execution_status(ExecutionStatus::Running);
        self.successful = false;
        if self.started_on.is_none() {
            self.started_on = Some(Utc::now());
        }
        self.dirty_exec = true;

        // Number stages by topological rank, 1-based.
        let stage_nodes: Vec<(i32, Vec<i32>)> = self
            .stage_order
            .iter()
            .filter_map(|id| self.stages.get(id))
            .map(|s| (s.id, s.parents.clone()))
            .collect();
        let order = topological_order(&stage_nodes, |id| {
            self.stages
                .get(&id)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| id.to_string())
        })?;
        for (rank, stage_id) in order.iter().enumerate() {
            if let Some(stage) = self.stages.get_mut(stage_id) {
                let number = Some(rank as u32 + 1);
                if stage.number != number {
                    stage.number = number;
                    self.dirty_stages.insert(*stage_id);
                }
            }
        }

        self.assert_unique_output_paths()?;

        // The scheduler's working copy: every task, minus the successful.
        let nodes: Vec<i32> = self.tasks.keys().copied().collect();
        let edges: Vec<(i32, i32)> = self
            .tasks
            .values()
            .flat_map(|t| t.children.iter().map(move |&c| (t.id, c)))
            .collect();
        let mut task_queue = TaskQueue::from_edges(&nodes, &edges);
        let successful: Vec<i32> = self
            .tasks
            .values()
            .filter(|t| t.successful())
            .map(|t| t.id)
            .collect();
        self.log.info(&format!(
            "Skipping {} successful tasks...",
            successful.len()
        ));
        for id in &successful {
            task_queue.remove(*id);
        }

        // Enough cores for the frontier.
        self.log.info("Ensuring there are enough cores...");
        if let Some(max_cpus) = self.max_cpus {
            for task in self.tasks.values().filter(|t| task_queue.contains(t.id)) {
                if task.cpu_req > max_cpus {
                    return Err(ValidationError::CpuReqExceedsMax {
                        task_id: task.id,
                        cpu_req: task.cpu_req,
                        max_cpus,
                    }
                    .into());
                }
            }
        }

        self.assign_log_dirs(&task_queue, &opts)?;
        self.generate_commands(&task_queue)?;
        self.reset_stage_attrs()?;

        let queued = task_queue.len();
        self.log.info(&format!(
            "Committing {} Tasks to the SQL database...",
            queued
        ));
        self.commit()?;

        for stage in self.stages().collect::<Vec<_>>() {
            self.log.info(&format!("{} {}", stage, stage.status));
        }

        if opts.dry {
            self.log.info("Dry run, not executing any tasks.");
            return Ok(true);
        }

        let outcome = scheduler::run_scheduler(self, &mut jobmanager, &mut task_queue).await;
        if let Err(e) = outcome {
            // Deferred catch-all: never leave a running execution behind.
            if self.status == ExecutionStatus::Running
                && !matches!(e, ExecutionError::Killed)
            {
                scheduler::terminate_run(self, &mut jobmanager, true)?;
            }
            return Err(e);
        }

        // Finalisation.
        match self.status {
            ExecutionStatus::FailedButRunning => {
                self.set_execution_status(ExecutionStatus::Failed);
                // A started stage whose remaining tasks were pruned never
                // completes on its own; it finalises as failed too.
                let demoted: Vec<i32> = self
                    .stages
                    .values()
                    .filter(|s| {
                        matches!(
                            s.status,
                            StageStatus::Running | StageStatus::RunningButFailed
                        )
                    })
                    .map(|s| s.id)
                    .collect();
                for id in demoted {
                    self.set_stage_status(id, StageStatus::Failed);
                }
                self.commit()?;
                Ok(false)
            }
            ExecutionStatus::Running => {
                if opts.set_successful {
                    self.set_execution_status(ExecutionStatus::Successful);
                }
                self.commit()?;
                self.log.info("Execution complete");
                Ok(true)
            }
            other => panic!("bad execution status at finalisation: {}", other),
        }
    }

    /// Terminates an execution that has no scheduler attached (the running
    /// case is handled inside the scheduler loop).
    pub fn terminate(&mut self, due_to_failure: bool) -> Result<(), ExecutionError> {
        self.log.warn(&format!("Terminating {}!", self));
        if due_to_failure {
            self.set_execution_status(ExecutionStatus::Failed);
        } else {
            self.set_execution_status(ExecutionStatus::Killed);
        }
        self.commit()?;
        Ok(())
    }

    /// Deletes this execution: closes the log, optionally removes the
    /// output directory, then cascade-deletes the rows.
    pub fn delete(self, delete_files: bool) -> Result<(), ExecutionError> {
        self.log.info(&format!(
            "Deleting {}, output_dir={}, delete_files={}",
            self,
            self.output_dir.display(),
            delete_files
        ));
        self.log.flush();

        if delete_files && self.output_dir.exists() {
            std::fs::remove_dir_all(&self.output_dir)?;
        }

        let store = self.store.clone();
        let id = self.id;
        store.transaction(|conn| store.execution().delete_cascade(conn, id))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pre-flight helpers
    // ------------------------------------------------------------------

    /// Duplicate output path detection across the whole DAG. NOOP outputs
    /// (pre-existing inputs) and `duplicate_ok` files are exempt.
    fn assert_unique_output_paths(&self) -> Result<(), ValidationError> {
        let mut seen: HashMap<&std::path::Path, i32> = HashMap::new();
        for task in self.tasks.values() {
            if task.noop {
                continue;
            }
            for file in &task.output_files {
                if file.duplicate_ok {
                    continue;
                }
                if let Some(&first) = seen.get(file.path.as_path()) {
                    self.log.error(&format!(
                        "Duplicate taskfile paths detected: {} produced by tasks {} and {}",
                        file.path.display(),
                        first,
                        task.id
                    ));
                    return Err(ValidationError::DuplicateOutputPath {
                        path: file.path.display().to_string(),
                        first_task: first,
                        second_task: task.id,
                    });
                }
                seen.insert(file.path.as_path(), task.id);
            }
        }
        Ok(())
    }

    /// Assigns a log directory to every queued task, collision-checked
    /// against each other and against the already-successful tasks.
    fn assign_log_dirs(
        &mut self,
        task_queue: &TaskQueue,
        opts: &RunOptions,
    ) -> Result<(), ValidationError> {
        self.log.info("Setting log output directories...");
        let mut log_dirs: HashMap<PathBuf, i32> = self
            .tasks
            .values()
            .filter(|t| t.successful())
            .filter_map(|t| t.log_dir.clone().map(|d| (d, t.id)))
            .collect();

        let queued: Vec<i32> = self
            .tasks
            .keys()
            .copied()
            .filter(|id| task_queue.contains(*id))
            .collect();
        for id in queued {
            let task = &self.tasks[&id];
            let log_dir = match &opts.log_output_dir {
                Some(f) => f(task),
                None => self
                    .output_dir
                    .join("log")
                    .join(&task.stage_name)
                    .join(task.id.to_string()),
            };
            if let Some(&other) = log_dirs.get(&log_dir) {
                return Err(ValidationError::DuplicateLogDir {
                    path: log_dir.display().to_string(),
                    first_task: other,
                    second_task: id,
                });
            }
            log_dirs.insert(log_dir.clone(), id);
            if let Some(task) = self.tasks.get_mut(&id) {
                if task.log_dir.as_ref() != Some(&log_dir) {
                    task.log_dir = Some(log_dir);
                    self.dirty_tasks.insert(id);
                }
            }
        }
        Ok(())
    }

    /// Renders commands for queued non-NOOP tasks. Tasks hydrated from the
    /// store keep their persisted command when no tool is bound.
    fn generate_commands(&mut self, task_queue: &TaskQueue) -> Result<(), ExecutionError> {
        let queued: Vec<i32> = self
            .tasks
            .keys()
            .copied()
            .filter(|id| task_queue.contains(*id))
            .collect();
        for id in queued {
            let task = &self.tasks[&id];
            if task.noop {
                continue;
            }
            let Some(tool) = self.tools.get(&id) else {
                if task.command.is_some() {
                    continue;
                }
                return Err(ExecutionError::Command {
                    task_id: id,
                    source: crate::error::ToolError::Command(
                        "no tool bound and no stored command".to_string(),
                    ),
                });
            };
            let empty = Params::new();
            let parameters = self.parameters.get(&task.stage_id).unwrap_or(&empty);
            let command = generate_command(tool.as_ref(), task, &self.settings, parameters)
                .map_err(|source| ExecutionError::Command { task_id: id, source })?;
            if let Some(task) = self.tasks.get_mut(&id) {
                if task.command.as_deref() != Some(command.as_str()) {
                    task.command = Some(command);
                    self.dirty_tasks.insert(id);
                }
            }
        }
        Ok(())
    }

    /// Demotes attempted stages that picked up new (or failed) tasks back to
    /// `running`, via the store's joined query.
    fn reset_stage_attrs(&mut self) -> Result<(), StoreError> {
        self.log.info("Checking stage attributes...");
        let store = self.store.clone();
        let execution_id = self.id;
        let to_reset = store.transaction(|conn| {
            store
                .stage()
                .attempted_with_unsuccessful_tasks(conn, execution_id)
        })?;
        for stage_id in to_reset {
            if self
                .stages
                .get(&stage_id)
                .map(|s| s.status != StageStatus::Running)
                .unwrap_or(false)
            {
                self.set_stage_status(stage_id, StageStatus::Running);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Flushes every dirty entity in one transaction. A failure here aborts
    /// the scheduler iteration and fails the run.
    pub(crate) fn commit(&mut self) -> Result<(), StoreError> {
        if !self.dirty_exec && self.dirty_stages.is_empty() && self.dirty_tasks.is_empty() {
            return Ok(());
        }

        let store = self.store.clone();
        let dirty_tasks: Vec<i32> = self.dirty_tasks.iter().copied().collect();
        let dirty_stages: Vec<i32> = self.dirty_stages.iter().copied().collect();
        let dirty_exec = self.dirty_exec;
        let info_json = serde_json::to_string(&self.info).unwrap_or_else(|_| "{}".to_string());

        store.transaction(|conn| {
            for id in &dirty_tasks {
                if let Some(task) = self.tasks.get(id) {
                    store.task().update_runtime(conn, task)?;
                }
            }
            for id in &dirty_stages {
                if let Some(stage) = self.stages.get(id) {
                    store.stage().update_state(
                        conn,
                        stage.id,
                        stage.number.map(|n| n as i32),
                        stage.status.as_str(),
                        stage.successful,
                        stage.finished_on.map(|d| d.naive_utc()),
                    )?;
                }
            }
            if dirty_exec {
                store.execution().update_lifecycle(
                    conn,
                    self.id,
                    self.status.as_str(),
                    self.successful,
                    self.started_on.map(|d| d.naive_utc()),
                    self.finished_on.map(|d| d.naive_utc()),
                    &info_json,
                )?;
            }
            Ok(())
        })?;

        self.dirty_tasks.clear();
        self.dirty_stages.clear();
        self.dirty_exec = false;
        Ok(())
    }

    /// Rebuilds the in-memory aggregate from the store: stages, tasks, task
    /// files and both edge sets. Called once when an existing execution is
    /// opened; a reconstructed DAG matches the one that was persisted.
    pub(crate) fn hydrate(&mut self) -> Result<(), StoreError> {
        let store = self.store.clone();
        let execution_id = self.id;

        let (stage_rows, stage_edges, task_rows, file_rows, task_edges) =
            store.transaction(|conn| {
                let stage_rows = store.stage().load_for_execution(conn, execution_id)?;
                let stage_ids: Vec<i32> = stage_rows.iter().map(|s| s.id).collect();
                let stage_edges = store.stage().load_edges(conn, &stage_ids)?;
                let task_rows = store.task().load_for_execution(conn, execution_id)?;
                let task_ids: Vec<i32> = task_rows.iter().map(|t| t.id).collect();
                let file_rows = store.task_file().load_for_tasks(conn, &task_ids)?;
                let task_edges = store.task().load_edges(conn, &task_ids)?;
                Ok((stage_rows, stage_edges, task_rows, file_rows, task_edges))
            })?;

        let mut stage_names: HashMap<i32, String> = HashMap::new();
        for row in &stage_rows {
            stage_names.insert(row.id, row.name.clone());
        }

        for row in stage_rows {
            let mut stage = Stage::new(row.id, &row.name);
            stage.number = row.number.map(|n| n as u32);
            stage.status = StageStatus::parse(&row.status).unwrap_or(StageStatus::NoAttempt);
            stage.successful = row.successful;
            stage.finished_on = row.finished_on.map(|d| d.and_utc());
            self.stage_order.push(row.id);
            self.stages.insert(row.id, stage);
        }
        for edge in stage_edges {
            if let Some(stage) = self.stages.get_mut(&edge.child_id) {
                if !stage.parents.contains(&edge.parent_id) {
                    stage.parents.push(edge.parent_id);
                }
            }
        }

        let mut files_by_task: HashMap<i32, Vec<crate::task::TaskFile>> = HashMap::new();
        for row in file_rows {
            files_by_task
                .entry(row.task_id)
                .or_default()
                .push(row.into());
        }

        for row in task_rows {
            let task = Task {
                id: row.id,
                stage_id: row.stage_id,
                stage_name: stage_names
                    .get(&row.stage_id)
                    .cloned()
                    .unwrap_or_default(),
                tags: serde_json::from_str(&row.tags).unwrap_or_default(),
                cpu_req: row.cpu_req.max(1) as u32,
                mem_req: row.mem_req.map(|v| v as u32),
                time_req: row.time_req.map(|v| v as u32),
                must_succeed: row.must_succeed,
                noop: row.noop,
                status: TaskStatus::parse(&row.status).unwrap_or(TaskStatus::NoAttempt),
                attempt: row.attempt.max(0) as u32,
                log_dir: row.log_dir.map(PathBuf::from),
                command: row.command,
                profile: serde_json::from_str(&row.profile).unwrap_or_default(),
                parents: Vec::new(),
                children: Vec::new(),
                input_files: Vec::new(),
                output_files: files_by_task.remove(&row.id).unwrap_or_default(),
            };
            if let Some(stage) = self.stages.get_mut(&row.stage_id) {
                stage.task_ids.push(row.id);
            }
            self.tasks.insert(row.id, task);
        }

        for edge in task_edges {
            if let Some(child) = self.tasks.get_mut(&edge.child_id) {
                child.parents.push(edge.parent_id);
            }
            if let Some(parent) = self.tasks.get_mut(&edge.parent_id) {
                parent.children.push(edge.child_id);
            }
        }

        // Re-derive input files from parent outputs, the same resolution a
        // fresh graph build performs.
        let resolved: Vec<(i32, Vec<crate::task::TaskFile>)> = self
            .tasks
            .values()
            .filter(|t| !t.parents.is_empty())
            .map(|t| {
                let inputs = t
                    .parents
                    .iter()
                    .filter_map(|p| self.tasks.get(p))
                    .flat_map(|p| p.output_files.iter().cloned())
                    .collect();
                (t.id, inputs)
            })
            .collect();
        for (id, inputs) in resolved {
            if let Some(task) = self.tasks.get_mut(&id) {
                task.input_files = inputs;
            }
        }

        Ok(())
    }

    /// Writes `profile.json` into a task's log directory.
    pub(crate) fn write_profile(&self, task_id: i32) {
        let Some(task) = self.tasks.get(&task_id) else {
            return;
        };
        let Some(log_dir) = &task.log_dir else {
            return;
        };
        if std::fs::create_dir_all(log_dir).is_ok() {
            if let Ok(json) = serde_json::to_string_pretty(&task.profile) {
                let _ = std::fs::write(log_dir.join("profile.json"), json);
            }
        }
    }
}
