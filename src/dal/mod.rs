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

//! Data access layer.
//!
//! The engine assumes read-your-writes within a transaction and that a
//! commit flushes every pending mutation atomically. All query methods take
//! a caller-provided connection so several of them compose inside one
//! [`DAL::transaction`] call; graph construction and the scheduler's
//! per-iteration commit both rely on that.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::database::Database;
use crate::error::StoreError;

pub mod execution;
pub mod stage;
pub mod task;
pub mod task_file;

use execution::ExecutionDAL;
use stage::StageDAL;
use task::TaskDAL;
use task_file::TaskFileDAL;

/// The main data access layer handle.
#[derive(Clone, Debug)]
pub struct DAL {
    pub database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    /// Checks out a connection from the pool.
    pub fn connection(&self) -> Result<crate::database::DbConnection, StoreError> {
        Ok(self.database.pool().get()?)
    }

    /// Executes a closure within a database transaction. Any error rolls the
    /// transaction back.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, StoreError>,
    {
        let mut conn = self.connection()?;
        let conn = &mut *conn;
        conn.transaction(f)
    }

    pub fn execution(&self) -> ExecutionDAL<'_> {
        ExecutionDAL { dal: self }
    }

    pub fn stage(&self) -> StageDAL<'_> {
        StageDAL { dal: self }
    }

    pub fn task(&self) -> TaskDAL<'_> {
        TaskDAL { dal: self }
    }

    pub fn task_file(&self) -> TaskFileDAL<'_> {
        TaskFileDAL { dal: self }
    }
}
