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

//! Stage row model.

use chrono::NaiveDateTime;
use diesel::prelude::*;

/// A row in `stages`.
#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = crate::database::schema::stages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StageRow {
    pub id: i32,
    pub execution_id: i32,
    pub name: String,
    pub number: Option<i32>,
    pub status: String,
    pub successful: bool,
    pub finished_on: Option<NaiveDateTime>,
}

/// A new stage to insert.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::database::schema::stages)]
pub struct NewStage {
    pub execution_id: i32,
    pub name: String,
    pub status: String,
}
