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

//! # Recipes
//!
//! A [`Recipe`] is a build-time declaration of stages and their parent
//! relationships. It records tool instances for source stages and tool
//! factories plus a [`Relation`] for derived stages; it never touches the
//! store. `Execution::expand` turns a recipe into concrete tasks.
//!
//! The relation decides how parent tasks map to child tag sets:
//!
//! - `One2one`: one child per parent task, same tags.
//! - `One2many`: one child per parent task and split-value combination.
//! - `Many2one`: one child per distinct projection of the parent tags onto
//!   the group keys.
//! - `Many2many`: group as many2one, then split as one2many.

use crate::error::ValidationError;
use crate::tags::{TagValue, Tags};
use crate::task::Task;
use crate::tool::{Params, Tool};

/// How parent tasks expand into child tag sets.
#[derive(Debug, Clone)]
pub enum Relation {
    One2one,
    /// New tag keys with the values to fan out over.
    One2many(Vec<(String, Vec<TagValue>)>),
    /// Tag keys to group parents by.
    Many2one(Vec<String>),
    Many2many {
        groupby: Vec<String>,
        splitby: Vec<(String, Vec<TagValue>)>,
    },
}

/// Constructs a tool for one expanded tag set of a derived stage.
pub type ToolFactory = Box<dyn Fn(Tags) -> Box<dyn Tool> + Send>;

/// Opaque handle to a stage declared on a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRef(pub(crate) usize);

pub(crate) enum StageKind {
    Source { tools: Vec<Box<dyn Tool>> },
    Derived { factory: ToolFactory, relation: Relation },
}

pub(crate) struct RecipeStage {
    pub name: String,
    pub parents: Vec<StageRef>,
    pub kind: StageKind,
    pub parameters: Params,
}

/// A declarative description of a pipeline, independent of any run.
#[derive(Default)]
pub struct Recipe {
    pub(crate) stages: Vec<RecipeStage>,
}

impl Recipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a source stage from explicit tool instances. The stage name
    /// defaults to the first tool's name.
    pub fn add_source(&mut self, tools: Vec<Box<dyn Tool>>, name: Option<&str>) -> StageRef {
        let name = name
            .map(str::to_string)
            .or_else(|| tools.first().map(|t| t.name().to_string()))
            .unwrap_or_else(|| format!("stage_{}", self.stages.len()));
        self.stages.push(RecipeStage {
            name,
            parents: Vec::new(),
            kind: StageKind::Source { tools },
            parameters: Params::new(),
        });
        StageRef(self.stages.len() - 1)
    }

    /// Declares a derived stage whose tasks are expanded from the parent
    /// stages' tasks according to `relation`.
    pub fn add_stage(
        &mut self,
        name: &str,
        factory: ToolFactory,
        parents: &[StageRef],
        relation: Relation,
    ) -> StageRef {
        self.stages.push(RecipeStage {
            name: name.to_string(),
            parents: parents.to_vec(),
            kind: StageKind::Derived { factory, relation },
            parameters: Params::new(),
        });
        StageRef(self.stages.len() - 1)
    }

    /// Attaches command parameters to the most recently declared stage.
    pub fn with_parameters(&mut self, stage: StageRef, parameters: Params) {
        self.stages[stage.0].parameters = parameters;
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// One prospective child task: its tag set and the parent task ids it
/// depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub tags: Tags,
    pub parent_ids: Vec<i32>,
}

/// Expands parent tasks into child tag sets per the relation.
///
/// Parents are processed in id order and groups in projection order, so the
/// produced batch is deterministic.
pub fn expand_relation(
    relation: &Relation,
    parents: &[&Task],
    stage: &str,
) -> Result<Vec<Expansion>, ValidationError> {
    let mut parents: Vec<&Task> = parents.to_vec();
    parents.sort_by_key(|t| t.id);

    match relation {
        Relation::One2one => Ok(parents
            .iter()
            .map(|p| Expansion {
                tags: p.tags.clone(),
                parent_ids: vec![p.id],
            })
            .collect()),

        Relation::One2many(splits) => {
            let mut out = Vec::new();
            for p in &parents {
                for combo in cartesian(splits) {
                    let mut tags = p.tags.clone();
                    for (k, v) in combo {
                        tags.insert(k, v);
                    }
                    out.push(Expansion {
                        tags,
                        parent_ids: vec![p.id],
                    });
                }
            }
            Ok(out)
        }

        Relation::Many2one(keys) => group_parents(&parents, keys, stage).map(|groups| {
            groups
                .into_iter()
                .map(|(tags, ids)| Expansion {
                    tags,
                    parent_ids: ids,
                })
                .collect()
        }),

        Relation::Many2many { groupby, splitby } => {
            let groups = group_parents(&parents, groupby, stage)?;
            let mut out = Vec::new();
            for (projection, ids) in groups {
                for combo in cartesian(splitby) {
                    let mut tags = projection.clone();
                    for (k, v) in combo {
                        tags.insert(k, v);
                    }
                    out.push(Expansion {
                        tags,
                        parent_ids: ids.clone(),
                    });
                }
            }
            Ok(out)
        }
    }
}

/// Groups parent tasks by their projection onto `keys`, ordered by
/// projection. A parent missing one of the keys is a validation error.
fn group_parents(
    parents: &[&Task],
    keys: &[String],
    stage: &str,
) -> Result<Vec<(Tags, Vec<i32>)>, ValidationError> {
    use std::collections::BTreeMap;

    let mut groups: BTreeMap<Tags, Vec<i32>> = BTreeMap::new();
    for p in parents {
        let mut projection = Tags::new();
        for key in keys {
            let value =
                p.tags
                    .get(key)
                    .cloned()
                    .ok_or_else(|| ValidationError::MissingGroupKey {
                        key: key.clone(),
                        stage: stage.to_string(),
                        task_id: p.id,
                    })?;
            projection.insert(key.clone(), value);
        }
        groups.entry(projection).or_default().push(p.id);
    }
    Ok(groups.into_iter().collect())
}

/// Cartesian product over split lists, in declaration order.
fn cartesian(splits: &[(String, Vec<TagValue>)]) -> Vec<Vec<(String, TagValue)>> {
    let mut combos: Vec<Vec<(String, TagValue)>> = vec![Vec::new()];
    for (key, values) in splits {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                extended.push((key.clone(), value.clone()));
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}
