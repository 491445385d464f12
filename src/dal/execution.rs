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

//! Execution data access.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use super::DAL;
use crate::database::schema::{executions, stage_edges, stages, task_edges, task_files, tasks};
use crate::error::StoreError;
use crate::models::{ExecutionRow, NewExecution};

pub struct ExecutionDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> ExecutionDAL<'a> {
    /// Inserts a new execution row and returns it with its id.
    pub fn insert(
        &self,
        conn: &mut SqliteConnection,
        new: NewExecution,
    ) -> Result<ExecutionRow, StoreError> {
        Ok(diesel::insert_into(executions::table)
            .values(&new)
            .returning(ExecutionRow::as_returning())
            .get_result(conn)?)
    }

    /// Looks an execution up by its unique name.
    pub fn get_by_name(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
    ) -> Result<Option<ExecutionRow>, StoreError> {
        Ok(executions::table
            .filter(executions::name.eq(name))
            .select(ExecutionRow::as_select())
            .first(conn)
            .optional()?)
    }

    /// Writes the mutable lifecycle fields of an execution.
    #[allow(clippy::too_many_arguments)]
    pub fn update_lifecycle(
        &self,
        conn: &mut SqliteConnection,
        id: i32,
        status: &str,
        successful: bool,
        started_on: Option<NaiveDateTime>,
        finished_on: Option<NaiveDateTime>,
        info: &str,
    ) -> Result<(), StoreError> {
        diesel::update(executions::table.filter(executions::id.eq(id)))
            .set((
                executions::status.eq(status),
                executions::successful.eq(successful),
                executions::started_on.eq(started_on),
                executions::finished_on.eq(finished_on),
                executions::info.eq(info),
            ))
            .execute(conn)?;
        Ok(())
    }

    /// Writes the resource limits, which `start` may override on resumption.
    pub fn update_limits(
        &self,
        conn: &mut SqliteConnection,
        id: i32,
        max_cpus: Option<i32>,
        max_attempts: i32,
    ) -> Result<(), StoreError> {
        diesel::update(executions::table.filter(executions::id.eq(id)))
            .set((
                executions::max_cpus.eq(max_cpus),
                executions::max_attempts.eq(max_attempts),
            ))
            .execute(conn)?;
        Ok(())
    }

    /// Deletes an execution and everything it owns: tasks, task files, both
    /// edge tables, stages, then the execution row itself.
    pub fn delete_cascade(&self, conn: &mut SqliteConnection, id: i32) -> Result<(), StoreError> {
        let stage_ids: Vec<i32> = stages::table
            .filter(stages::execution_id.eq(id))
            .select(stages::id)
            .load(conn)?;
        let task_ids: Vec<i32> = tasks::table
            .filter(tasks::stage_id.eq_any(&stage_ids))
            .select(tasks::id)
            .load(conn)?;

        diesel::delete(task_edges::table.filter(task_edges::parent_id.eq_any(&task_ids)))
            .execute(conn)?;
        diesel::delete(task_edges::table.filter(task_edges::child_id.eq_any(&task_ids)))
            .execute(conn)?;
        diesel::delete(task_files::table.filter(task_files::task_id.eq_any(&task_ids)))
            .execute(conn)?;
        diesel::delete(tasks::table.filter(tasks::id.eq_any(&task_ids))).execute(conn)?;
        diesel::delete(stage_edges::table.filter(stage_edges::parent_id.eq_any(&stage_ids)))
            .execute(conn)?;
        diesel::delete(stage_edges::table.filter(stage_edges::child_id.eq_any(&stage_ids)))
            .execute(conn)?;
        diesel::delete(stages::table.filter(stages::id.eq_any(&stage_ids))).execute(conn)?;
        diesel::delete(executions::table.filter(executions::id.eq(id))).execute(conn)?;
        Ok(())
    }
}
