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

//! Task file data access.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use super::DAL;
use crate::database::schema::task_files;
use crate::error::StoreError;
use crate::models::{NewTaskFile, TaskFileRow};

pub struct TaskFileDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> TaskFileDAL<'a> {
    pub fn insert(
        &self,
        conn: &mut SqliteConnection,
        new: NewTaskFile,
    ) -> Result<TaskFileRow, StoreError> {
        Ok(diesel::insert_into(task_files::table)
            .values(&new)
            .returning(TaskFileRow::as_returning())
            .get_result(conn)?)
    }

    /// Output files of the given tasks, ordered by id.
    pub fn load_for_tasks(
        &self,
        conn: &mut SqliteConnection,
        task_ids: &[i32],
    ) -> Result<Vec<TaskFileRow>, StoreError> {
        Ok(task_files::table
            .filter(task_files::task_id.eq_any(task_ids))
            .order(task_files::id.asc())
            .select(TaskFileRow::as_select())
            .load(conn)?)
    }
}
