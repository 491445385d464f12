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

//! Task row model.

use diesel::prelude::*;

use crate::task::Task;

/// A row in `tasks`. `tags` and `profile` are JSON text.
#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = crate::database::schema::tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskRow {
    pub id: i32,
    pub stage_id: i32,
    pub tags: String,
    pub status: String,
    pub attempt: i32,
    pub cpu_req: i32,
    pub mem_req: Option<i32>,
    pub time_req: Option<i32>,
    pub must_succeed: bool,
    pub noop: bool,
    pub log_dir: Option<String>,
    pub command: Option<String>,
    pub profile: String,
}

/// A new task to insert.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::database::schema::tasks)]
pub struct NewTask {
    pub stage_id: i32,
    pub tags: String,
    pub status: String,
    pub attempt: i32,
    pub cpu_req: i32,
    pub mem_req: Option<i32>,
    pub time_req: Option<i32>,
    pub must_succeed: bool,
    pub noop: bool,
    pub log_dir: Option<String>,
    pub command: Option<String>,
    pub profile: String,
}

impl NewTask {
    /// Captures a draft task's persistent fields.
    pub fn from_task(task: &Task) -> Self {
        Self {
            stage_id: task.stage_id,
            tags: serde_json::to_string(&task.tags).unwrap_or_else(|_| "{}".to_string()),
            status: task.status.as_str().to_string(),
            attempt: task.attempt as i32,
            cpu_req: task.cpu_req as i32,
            mem_req: task.mem_req.map(|v| v as i32),
            time_req: task.time_req.map(|v| v as i32),
            must_succeed: task.must_succeed,
            noop: task.noop,
            log_dir: task
                .log_dir
                .as_ref()
                .map(|p| p.display().to_string()),
            command: task.command.clone(),
            profile: serde_json::to_string(&task.profile).unwrap_or_else(|_| "{}".to_string()),
        }
    }
}
