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

//! Task file row model.

use diesel::prelude::*;

use crate::task::TaskFile;

/// A row in `task_files`.
#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = crate::database::schema::task_files)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskFileRow {
    pub id: i32,
    pub task_id: i32,
    pub name: String,
    pub basename: String,
    pub path: String,
    pub persist: bool,
    pub duplicate_ok: bool,
}

impl From<TaskFileRow> for TaskFile {
    fn from(row: TaskFileRow) -> Self {
        TaskFile {
            id: Some(row.id),
            name: row.name,
            basename: row.basename,
            path: row.path.into(),
            persist: row.persist,
            duplicate_ok: row.duplicate_ok,
            task_id: row.task_id,
        }
    }
}

/// A new task file to insert.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::database::schema::task_files)]
pub struct NewTaskFile {
    pub task_id: i32,
    pub name: String,
    pub basename: String,
    pub path: String,
    pub persist: bool,
    pub duplicate_ok: bool,
}

impl NewTaskFile {
    pub fn from_file(task_id: i32, file: &TaskFile) -> Self {
        Self {
            task_id,
            name: file.name.clone(),
            basename: file.basename.clone(),
            path: file.path.display().to_string(),
            persist: file.persist,
            duplicate_ok: file.duplicate_ok,
        }
    }
}
