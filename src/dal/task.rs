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

//! Task data access.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use super::DAL;
use crate::database::schema::{stages, task_edges, task_files, tasks};
use crate::error::StoreError;
use crate::models::{EdgeRow, NewTask, NewTaskEdge, TaskFileRow, TaskRow};
use crate::task::Task;

pub struct TaskDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> TaskDAL<'a> {
    pub fn insert(&self, conn: &mut SqliteConnection, new: NewTask) -> Result<TaskRow, StoreError> {
        Ok(diesel::insert_into(tasks::table)
            .values(&new)
            .returning(TaskRow::as_returning())
            .get_result(conn)?)
    }

    /// Tasks of one execution, ordered by id.
    pub fn load_for_execution(
        &self,
        conn: &mut SqliteConnection,
        execution_id: i32,
    ) -> Result<Vec<TaskRow>, StoreError> {
        Ok(tasks::table
            .inner_join(stages::table)
            .filter(stages::execution_id.eq(execution_id))
            .order(tasks::id.asc())
            .select(TaskRow::as_select())
            .load(conn)?)
    }

    pub fn insert_edge(
        &self,
        conn: &mut SqliteConnection,
        parent_id: i32,
        child_id: i32,
    ) -> Result<(), StoreError> {
        diesel::insert_into(task_edges::table)
            .values(&NewTaskEdge {
                parent_id,
                child_id,
            })
            .execute(conn)?;
        Ok(())
    }

    /// Parent/child pairs among the given tasks.
    pub fn load_edges(
        &self,
        conn: &mut SqliteConnection,
        task_ids: &[i32],
    ) -> Result<Vec<EdgeRow>, StoreError> {
        Ok(task_edges::table
            .filter(task_edges::parent_id.eq_any(task_ids))
            .select((task_edges::id, task_edges::parent_id, task_edges::child_id))
            .load::<(i32, i32, i32)>(conn)?
            .into_iter()
            .map(|(id, parent_id, child_id)| EdgeRow {
                id,
                parent_id,
                child_id,
            })
            .collect())
    }

    /// Writes the fields the scheduler mutates: status, attempt counter,
    /// log dir, command and profile.
    pub fn update_runtime(
        &self,
        conn: &mut SqliteConnection,
        task: &Task,
    ) -> Result<(), StoreError> {
        diesel::update(tasks::table.filter(tasks::id.eq(task.id)))
            .set((
                tasks::status.eq(task.status.as_str()),
                tasks::attempt.eq(task.attempt as i32),
                tasks::log_dir.eq(task.log_dir.as_ref().map(|p| p.display().to_string())),
                tasks::command.eq(task.command.clone()),
                tasks::profile
                    .eq(serde_json::to_string(&task.profile).unwrap_or_else(|_| "{}".to_string())),
            ))
            .execute(conn)?;
        Ok(())
    }

    /// Deletes every non-successful task of an execution, together with its
    /// edges and output file rows. Returns the deleted file rows so the
    /// caller can remove non-persist artifacts from disk.
    pub fn delete_unsuccessful(
        &self,
        conn: &mut SqliteConnection,
        execution_id: i32,
    ) -> Result<Vec<TaskFileRow>, StoreError> {
        let doomed: Vec<i32> = tasks::table
            .inner_join(stages::table)
            .filter(stages::execution_id.eq(execution_id))
            .filter(tasks::status.ne("successful"))
            .select(tasks::id)
            .load(conn)?;

        let files: Vec<TaskFileRow> = task_files::table
            .filter(task_files::task_id.eq_any(&doomed))
            .select(TaskFileRow::as_select())
            .load(conn)?;

        diesel::delete(task_edges::table.filter(task_edges::parent_id.eq_any(&doomed)))
            .execute(conn)?;
        diesel::delete(task_edges::table.filter(task_edges::child_id.eq_any(&doomed)))
            .execute(conn)?;
        diesel::delete(task_files::table.filter(task_files::task_id.eq_any(&doomed)))
            .execute(conn)?;
        diesel::delete(tasks::table.filter(tasks::id.eq_any(&doomed))).execute(conn)?;

        Ok(files)
    }
}
