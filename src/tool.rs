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

//! # Tools
//!
//! A [`Tool`] is a declarative template that produces tasks. It names its
//! logical inputs (resolved against parent outputs), describes its output
//! files (optionally through a basename template), carries resource
//! requirements, and renders the shell command through the single explicit
//! signature `cmd(inputs, outputs, params)`.
//!
//! Command parameters are merged with fixed precedence: settings are
//! overridden by stage parameters, which are overridden by the task's tags.
//!
//! [`Input`] and [`Inputs`] are NOOP tools whose outputs are files that
//! already exist on disk; they let a pipeline consume external data through
//! the same task-file machinery as generated artifacts.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ToolError, ValidationError};
use crate::status::TaskStatus;
use crate::tags::{tags_as_dirname, Tags};
use crate::task::{Profile, Task, TaskFile};

/// Per-app settings visible to command templates, lowest precedence.
pub type Settings = BTreeMap<String, String>;

/// Per-stage parameters, overriding settings, overridden by tags.
pub type Params = BTreeMap<String, String>;

/// Input task files grouped by logical name.
pub type InputMap = BTreeMap<String, Vec<TaskFile>>;

/// Output task files keyed by logical name.
pub type OutputMap = BTreeMap<String, TaskFile>;

/// Parameter names that cannot be used as tag keys.
pub const RESERVED_PARAM_NAMES: [&str; 5] = ["i", "o", "inputs", "outputs", "params"];

/// A declared input: either one logical name looked up on every parent, or
/// the wildcard consuming every parent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSpec {
    /// All parent outputs, regardless of name (`"*"` in recipes).
    All,
    Name(String),
}

impl From<&str> for InputSpec {
    fn from(s: &str) -> Self {
        if s == "*" {
            InputSpec::All
        } else {
            InputSpec::Name(s.to_string())
        }
    }
}

/// How an output file's basename is derived.
#[derive(Clone)]
pub enum BasenameTemplate {
    /// A literal with `{key}` placeholders resolved from the task's tags,
    /// then from settings.
    Literal(String),
    /// A callable of the resolved input map and settings.
    Func(Arc<dyn Fn(&InputMap, &Settings) -> String + Send + Sync>),
}

impl fmt::Debug for BasenameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BasenameTemplate::Literal(s) => write!(f, "Literal({:?})", s),
            BasenameTemplate::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// Descriptor for one output file of a tool.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    /// Logical role of the file.
    pub name: String,
    /// Basename template; defaults to the logical name.
    pub basename: Option<BasenameTemplate>,
    /// Exempts the file from the unique-path invariant.
    pub duplicate_ok: bool,
}

impl OutputSpec {
    /// An output whose basename is its logical name.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            basename: None,
            duplicate_ok: false,
        }
    }

    /// An output with a `{key}` basename template.
    pub fn with_basename(name: &str, template: &str) -> Self {
        Self {
            name: name.to_string(),
            basename: Some(BasenameTemplate::Literal(template.to_string())),
            duplicate_ok: false,
        }
    }

    /// An output whose basename is computed from inputs and settings.
    pub fn with_basename_fn<F>(name: &str, f: F) -> Self
    where
        F: Fn(&InputMap, &Settings) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            basename: Some(BasenameTemplate::Func(Arc::new(f))),
            duplicate_ok: false,
        }
    }

    pub fn duplicate_ok(mut self) -> Self {
        self.duplicate_ok = true;
        self
    }
}

/// Context handed to [`generate_task`]: the stage being populated and the
/// already-materialised parent tasks.
pub struct GenerateContext<'a> {
    pub stage_id: i32,
    pub stage_name: &'a str,
    pub output_dir: &'a Path,
    pub parents: Vec<&'a Task>,
}

/// A declarative task template, parameterised by a tag mapping.
///
/// Implementations override the resource and output descriptors they need;
/// everything defaults to a single-CPU, must-succeed tool with no declared
/// inputs or outputs. Non-NOOP tools must implement [`Tool::cmd`].
pub trait Tool: Send {
    /// Default stage name for this tool.
    fn name(&self) -> &str;

    /// The tag mapping identifying the produced task within its stage.
    fn tags(&self) -> &Tags;

    fn inputs(&self) -> Vec<InputSpec> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<OutputSpec> {
        Vec::new()
    }

    fn cpu_req(&self) -> u32 {
        1
    }

    /// Memory requirement in MB, advisory to the DRM.
    fn mem_req(&self) -> Option<u32> {
        None
    }

    /// Wall-clock limit in minutes, advisory to the DRM.
    fn time_req(&self) -> Option<u32> {
        None
    }

    fn must_succeed(&self) -> bool {
        true
    }

    /// NOOP tools produce tasks that are never forked.
    fn noop(&self) -> bool {
        false
    }

    /// Marks produced output files as surviving `restart` cleanup.
    fn persist(&self) -> bool {
        false
    }

    /// Output files with pre-determined paths, attached verbatim to the
    /// produced task. Used by [`Input`]/[`Inputs`].
    fn fixed_outputs(&self) -> Vec<TaskFile> {
        Vec::new()
    }

    /// Renders the shell command for one task.
    ///
    /// `inputs` groups the resolved input files by logical name, `outputs`
    /// keys this task's output files by logical name, and `params` carries
    /// the merged settings/parameters/tags.
    fn cmd(
        &self,
        inputs: &InputMap,
        outputs: &OutputMap,
        params: &Params,
    ) -> Result<String, ToolError> {
        let _ = (inputs, outputs, params);
        Err(ToolError::Command(format!(
            "{}.cmd is not implemented",
            self.name()
        )))
    }
}

/// Resolves a tool's declared inputs against its parents' outputs.
///
/// The wildcard collects every parent output. Named inputs are looked up on
/// each parent in order; a declared name that no parent provides is a
/// validation error.
pub fn map_inputs(
    specs: &[InputSpec],
    parents: &[&Task],
    stage: &str,
) -> Result<Vec<TaskFile>, ValidationError> {
    if specs.is_empty() {
        return Ok(Vec::new());
    }

    if specs.iter().any(|s| *s == InputSpec::All) {
        return Ok(parents
            .iter()
            .flat_map(|p| p.output_files.iter().cloned())
            .collect());
    }

    let mut resolved = Vec::new();
    for spec in specs {
        let InputSpec::Name(name) = spec else {
            continue;
        };
        let before = resolved.len();
        for parent in parents {
            if let Some(file) = parent.output(name) {
                resolved.push(file.clone());
            }
        }
        if resolved.len() == before {
            return Err(ValidationError::UnknownInput {
                input: name.clone(),
                stage: stage.to_string(),
            });
        }
    }
    Ok(resolved)
}

/// Groups task files by logical name, preserving order within each group.
pub fn group_by_name(files: &[TaskFile]) -> InputMap {
    let mut map = InputMap::new();
    for file in files {
        map.entry(file.name.clone()).or_default().push(file.clone());
    }
    map
}

/// Substitutes `{key}` placeholders using the supplied lookup.
fn format_template<F>(template: &str, lookup: F) -> Result<String, ToolError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut token = String::new();
        for t in chars.by_ref() {
            if t == '}' {
                break;
            }
            token.push(t);
        }
        match lookup(&token) {
            Some(value) => out.push_str(&value),
            None => return Err(ToolError::UnknownPlaceholder(token)),
        }
    }
    Ok(out)
}

/// Merges settings, parameters and tags into the command parameter map.
/// Later sources win: settings < parameters < tags.
pub fn merge_params(settings: &Settings, parameters: &Params, tags: &Tags) -> Params {
    let mut params = settings.clone();
    for (k, v) in parameters {
        params.insert(k.clone(), v.clone());
    }
    for (k, v) in tags {
        params.insert(k.clone(), v.to_string());
    }
    params
}

/// Materialises a fresh task (a draft with id 0) from a tool.
///
/// Inputs are resolved against the parents, output files get their basenames
/// from the descriptors and their paths under
/// `<output_dir>/<stage>/<tag-dir>/`, and fixed outputs are attached as-is.
pub fn generate_task(
    tool: &dyn Tool,
    ctx: &GenerateContext<'_>,
    settings: &Settings,
) -> Result<Task, ValidationError> {
    let tags = tool.tags().clone();
    let input_files = map_inputs(&tool.inputs(), &ctx.parents, ctx.stage_name)?;
    let input_map = group_by_name(&input_files);

    let mut task_dir = ctx.output_dir.join(ctx.stage_name);
    let tag_dir = tags_as_dirname(&tags);
    if !tag_dir.is_empty() {
        task_dir = task_dir.join(tag_dir);
    }

    let mut output_files = Vec::new();
    for spec in tool.outputs() {
        let basename = match &spec.basename {
            None => spec.name.clone(),
            Some(BasenameTemplate::Func(f)) => f(&input_map, settings),
            Some(BasenameTemplate::Literal(template)) => {
                format_template(template, |key| {
                    tags.get(key)
                        .map(|v| v.to_string())
                        .or_else(|| settings.get(key).cloned())
                })
                .map_err(|e| match e {
                    ToolError::UnknownPlaceholder(token) => ValidationError::BasenameTemplateKey {
                        output: spec.name.clone(),
                        stage: ctx.stage_name.to_string(),
                        token,
                    },
                    ToolError::Command(msg) => ValidationError::BasenameTemplateKey {
                        output: spec.name.clone(),
                        stage: ctx.stage_name.to_string(),
                        token: msg,
                    },
                })?
            }
        };
        output_files.push(TaskFile {
            id: None,
            name: spec.name.clone(),
            basename: basename.clone(),
            path: task_dir.join(&basename),
            persist: tool.persist(),
            duplicate_ok: spec.duplicate_ok,
            task_id: 0,
        });
    }
    output_files.extend(tool.fixed_outputs());

    Ok(Task {
        id: 0,
        stage_id: ctx.stage_id,
        stage_name: ctx.stage_name.to_string(),
        tags,
        cpu_req: tool.cpu_req(),
        mem_req: tool.mem_req(),
        time_req: tool.time_req(),
        must_succeed: tool.must_succeed(),
        noop: tool.noop(),
        status: TaskStatus::NoAttempt,
        attempt: 0,
        log_dir: None,
        command: None,
        profile: Profile::default(),
        parents: ctx.parents.iter().map(|p| p.id).collect(),
        children: Vec::new(),
        input_files,
        output_files,
    })
}

/// Renders the command string for a non-NOOP task.
pub fn generate_command(
    tool: &dyn Tool,
    task: &Task,
    settings: &Settings,
    parameters: &Params,
) -> Result<String, ToolError> {
    let inputs = group_by_name(&task.input_files);
    let outputs: OutputMap = task
        .output_files
        .iter()
        .map(|f| (f.name.clone(), f.clone()))
        .collect();
    let params = merge_params(settings, parameters, &task.tags);
    tool.cmd(&inputs, &outputs, &params)
}

/// A NOOP tool loading a single pre-existing file into the pipeline.
#[derive(Debug)]
pub struct Input {
    input_name: String,
    path: PathBuf,
    tags: Tags,
}

impl Input {
    /// Canonicalises `path` and fails if it does not exist.
    pub fn new(name: &str, path: impl AsRef<Path>, tags: Tags) -> Result<Self, ValidationError> {
        let path =
            std::fs::canonicalize(path.as_ref()).map_err(|_| ValidationError::MissingInputPath {
                path: path.as_ref().display().to_string(),
            })?;
        Ok(Self {
            input_name: name.to_string(),
            path,
            tags,
        })
    }
}

impl Tool for Input {
    fn name(&self) -> &str {
        "Input"
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn noop(&self) -> bool {
        true
    }

    fn fixed_outputs(&self) -> Vec<TaskFile> {
        let basename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input_name.clone());
        vec![TaskFile {
            id: None,
            name: self.input_name.clone(),
            basename,
            path: self.path.clone(),
            persist: true,
            duplicate_ok: false,
            task_id: 0,
        }]
    }
}

/// A NOOP tool loading several pre-existing files into the pipeline.
pub struct Inputs {
    files: Vec<(String, PathBuf)>,
    tags: Tags,
}

impl Inputs {
    /// Canonicalises every `(name, path)` pair and fails on the first path
    /// that does not exist.
    pub fn new(
        files: Vec<(String, PathBuf)>,
        tags: Tags,
    ) -> Result<Self, ValidationError> {
        let files = files
            .into_iter()
            .map(|(name, path)| {
                std::fs::canonicalize(&path)
                    .map(|p| (name, p))
                    .map_err(|_| ValidationError::MissingInputPath {
                        path: path.display().to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { files, tags })
    }
}

impl Tool for Inputs {
    fn name(&self) -> &str {
        "Inputs"
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn noop(&self) -> bool {
        true
    }

    fn fixed_outputs(&self) -> Vec<TaskFile> {
        self.files
            .iter()
            .map(|(name, path)| TaskFile {
                id: None,
                name: name.clone(),
                basename: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.clone()),
                path: path.clone(),
                persist: true,
                duplicate_ok: false,
                task_id: 0,
            })
            .collect()
    }
}
