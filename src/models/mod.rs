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

//! Row models for the pipeline tables.

pub mod execution;
pub mod stage;
pub mod task;
pub mod task_file;

pub use execution::{ExecutionRow, NewExecution};
pub use stage::{NewStage, StageRow};
pub use task::{NewTask, TaskRow};
pub use task_file::{NewTaskFile, TaskFileRow};

use diesel::prelude::*;

/// A row in one of the edge tables (`stage_edges`, `task_edges`).
#[derive(Debug, Queryable)]
pub struct EdgeRow {
    pub id: i32,
    pub parent_id: i32,
    pub child_id: i32,
}

/// Insertable stage edge.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::database::schema::stage_edges)]
pub struct NewStageEdge {
    pub parent_id: i32,
    pub child_id: i32,
}

/// Insertable task edge.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::database::schema::task_edges)]
pub struct NewTaskEdge {
    pub parent_id: i32,
    pub child_id: i32,
}
