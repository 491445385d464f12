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

//! Stage data access.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use super::DAL;
use crate::database::schema::{stage_edges, stages, tasks};
use crate::error::StoreError;
use crate::models::{EdgeRow, NewStage, NewStageEdge, StageRow};

pub struct StageDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> StageDAL<'a> {
    pub fn insert(
        &self,
        conn: &mut SqliteConnection,
        new: NewStage,
    ) -> Result<StageRow, StoreError> {
        Ok(diesel::insert_into(stages::table)
            .values(&new)
            .returning(StageRow::as_returning())
            .get_result(conn)?)
    }

    /// Stages of one execution, ordered by id (creation order).
    pub fn load_for_execution(
        &self,
        conn: &mut SqliteConnection,
        execution_id: i32,
    ) -> Result<Vec<StageRow>, StoreError> {
        Ok(stages::table
            .filter(stages::execution_id.eq(execution_id))
            .order(stages::id.asc())
            .select(StageRow::as_select())
            .load(conn)?)
    }

    pub fn insert_edge(
        &self,
        conn: &mut SqliteConnection,
        parent_id: i32,
        child_id: i32,
    ) -> Result<(), StoreError> {
        diesel::insert_into(stage_edges::table)
            .values(&NewStageEdge {
                parent_id,
                child_id,
            })
            .execute(conn)?;
        Ok(())
    }

    /// Parent/child pairs among the given stages.
    pub fn load_edges(
        &self,
        conn: &mut SqliteConnection,
        stage_ids: &[i32],
    ) -> Result<Vec<EdgeRow>, StoreError> {
        Ok(stage_edges::table
            .filter(stage_edges::parent_id.eq_any(stage_ids))
            .select((stage_edges::id, stage_edges::parent_id, stage_edges::child_id))
            .load::<(i32, i32, i32)>(conn)?
            .into_iter()
            .map(|(id, parent_id, child_id)| EdgeRow {
                id,
                parent_id,
                child_id,
            })
            .collect())
    }

    /// Writes the mutable fields of a stage.
    pub fn update_state(
        &self,
        conn: &mut SqliteConnection,
        id: i32,
        number: Option<i32>,
        status: &str,
        successful: bool,
        finished_on: Option<NaiveDateTime>,
    ) -> Result<(), StoreError> {
        diesel::update(stages::table.filter(stages::id.eq(id)))
            .set((
                stages::number.eq(number),
                stages::status.eq(status),
                stages::successful.eq(successful),
                stages::finished_on.eq(finished_on),
            ))
            .execute(conn)?;
        Ok(())
    }

    /// Stages of this execution that own an unsuccessful task and have been
    /// attempted. On resumption these are demoted back to `running` so their
    /// new tasks count against them again.
    pub fn attempted_with_unsuccessful_tasks(
        &self,
        conn: &mut SqliteConnection,
        execution_id: i32,
    ) -> Result<Vec<i32>, StoreError> {
        Ok(stages::table
            .inner_join(tasks::table)
            .filter(stages::execution_id.eq(execution_id))
            .filter(stages::status.ne("no_attempt"))
            .filter(tasks::status.ne("successful"))
            .select(stages::id)
            .distinct()
            .load(conn)?)
    }
}
