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

//! Execution row model.

use chrono::NaiveDateTime;
use diesel::prelude::*;

/// A row in `executions`.
///
/// `info` is a JSON-encoded mapping; `status` is the snake_case text of an
/// `ExecutionStatus`.
#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = crate::database::schema::executions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ExecutionRow {
    pub id: i32,
    pub name: String,
    pub output_dir: String,
    pub successful: bool,
    pub max_cpus: Option<i32>,
    pub max_attempts: i32,
    pub info: String,
    pub status: String,
    pub created_on: Option<NaiveDateTime>,
    pub started_on: Option<NaiveDateTime>,
    pub finished_on: Option<NaiveDateTime>,
}

/// A new execution to insert.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::database::schema::executions)]
pub struct NewExecution {
    pub name: String,
    pub output_dir: String,
    pub successful: bool,
    pub max_cpus: Option<i32>,
    pub max_attempts: i32,
    pub info: String,
    pub status: String,
    pub created_on: Option<NaiveDateTime>,
}
