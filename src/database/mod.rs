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

//! Database connection management for SQLite using Diesel.
//!
//! A thin `r2d2` pool wrapper plus embedded migrations. Pool construction
//! panics: an unreachable database is a fatal startup error, handled at
//! application construction rather than threaded through every call site.

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use crate::error::StoreError;

pub mod schema;

/// All migrations, compiled into the binary.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// A pooled SQLite connection.
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// A pool of SQLite connections.
///
/// `Database` is `Clone`; each clone references the same underlying pool.
/// SQLite allows a single writer, so the pool defaults to one connection.
#[derive(Clone)]
pub struct Database {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Database {
    /// Creates a connection pool for `database_url` (a filesystem path or
    /// `:memory:`).
    ///
    /// # Panics
    ///
    /// Panics if the pool cannot be created.
    pub fn new(database_url: &str, max_size: u32) -> Self {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .expect("Failed to create connection pool");

        if let Ok(mut conn) = pool.get() {
            // Serialise concurrent writers instead of erroring immediately.
            let _ = conn.batch_execute("PRAGMA busy_timeout = 5000;");
        }

        info!("Database connection pool initialized ({})", database_url);

        Self { pool }
    }

    /// Gets the connection pool.
    pub fn pool(&self) -> Pool<ConnectionManager<SqliteConnection>> {
        self.pool.clone()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

/// Applies all pending migrations.
pub fn run_migrations(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    conn.run_pending_migrations(MIGRATIONS)
        .map(|applied| {
            if !applied.is_empty() {
                info!("Applied {} migration(s)", applied.len());
            }
        })
        .map_err(|e| StoreError::Migration(e.to_string()))
}

/// Reverts every migration, then reapplies them. This is not reversible.
pub fn reset_database(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    conn.revert_all_migrations(MIGRATIONS)
        .map_err(|e| StoreError::Migration(e.to_string()))?;
    run_migrations(conn)
}
