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

//! Stages: named groups of homogeneous tasks.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::status::StageStatus;

/// A named group of tasks at one level of the pipeline, one task per
/// distinct tag mapping. Stage parent edges form their own DAG, used only
/// for topological numbering at run start.
#[derive(Debug, Clone)]
pub struct Stage {
    pub id: i32,
    /// Unique within the owning execution.
    pub name: String,
    /// 1-based topological rank, assigned at run start.
    pub number: Option<u32>,
    pub status: StageStatus,
    pub successful: bool,
    pub finished_on: Option<DateTime<Utc>>,
    /// Parent stage ids.
    pub parents: Vec<i32>,
    /// Tasks owned by this stage, in creation order.
    pub task_ids: Vec<i32>,
}

impl Stage {
    pub fn new(id: i32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            number: None,
            status: StageStatus::NoAttempt,
            successful: false,
            finished_on: None,
            parents: Vec::new(),
            task_ids: Vec::new(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Stage[{}] {}>", self.id, self.name)
    }
}
