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

//! # Application handle
//!
//! [`Sluice`] wires the pieces together: the database (URL from the caller
//! or `SLUICE_DATABASE_URL`, `.env` honoured), the default DRM and queue,
//! and app-level settings visible to tools. `start` opens or creates an
//! execution by name; under `restart` it deletes all non-successful tasks
//! (and their non-persist output files on disk) so the run resumes from its
//! successful frontier.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::dal::DAL;
use crate::database::{run_migrations, reset_database, Database};
use crate::error::{ConfigurationError, ExecutionError, StoreError, ValidationError};
use crate::execution::Execution;
use crate::job::drm::validate_drm_name;
use crate::logging::ExecutionLog;
use crate::models::NewExecution;
use crate::status::ExecutionStatus;
use crate::tool::Settings;

static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("invalid name pattern")
});

/// Options for [`Sluice::start`].
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Unique execution name, `[A-Za-z0-9_-]+`.
    pub name: String,
    pub output_dir: PathBuf,
    pub max_cpus: Option<u32>,
    /// Submissions allowed per task, >= 1.
    pub max_attempts: u32,
    /// Delete non-successful tasks of a previous attempt before resuming.
    pub restart: bool,
    /// Suppress the interactive restart confirmation.
    pub skip_confirm: bool,
}

impl StartOptions {
    pub fn new(name: &str, output_dir: impl AsRef<Path>) -> Self {
        Self {
            name: name.to_string(),
            output_dir: output_dir.as_ref().to_path_buf(),
            max_cpus: None,
            max_attempts: 1,
            restart: false,
            skip_confirm: false,
        }
    }

    pub fn max_cpus(mut self, max_cpus: u32) -> Self {
        self.max_cpus = Some(max_cpus);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }

    pub fn skip_confirm(mut self, skip_confirm: bool) -> Self {
        self.skip_confirm = skip_confirm;
        self
    }
}

/// The application object: database, default DRM and app settings.
#[derive(Clone, Debug)]
pub struct Sluice {
    database: Database,
    store: DAL,
    default_drm: String,
    default_queue: Option<String>,
    settings: Settings,
}

impl Sluice {
    /// Creates the app. `database_url` falls back to the
    /// `SLUICE_DATABASE_URL` environment variable (a `.env` file is
    /// honoured).
    pub fn new(
        database_url: Option<&str>,
        default_drm: &str,
        default_queue: Option<&str>,
    ) -> Result<Self, ConfigurationError> {
        dotenvy::dotenv().ok();
        let url = database_url
            .map(str::to_string)
            .or_else(|| std::env::var("SLUICE_DATABASE_URL").ok())
            .ok_or(ConfigurationError::MissingDatabaseUrl)?;
        validate_drm_name(default_drm)?;

        let database = Database::new(&url, 1);
        let store = DAL::new(database.clone());
        Ok(Self {
            database,
            store,
            default_drm: default_drm.to_string(),
            default_queue: default_queue.map(str::to_string),
            settings: Settings::new(),
        })
    }

    /// App-level settings visible to every tool's command template.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn store(&self) -> &DAL {
        &self.store
    }

    /// Initializes the database via the embedded migrations.
    pub fn initdb(&self) -> Result<(), StoreError> {
        let mut conn = self.store.connection()?;
        run_migrations(&mut conn)
    }

    /// Drops and recreates every table. This is not reversible.
    pub fn resetdb(&self) -> Result<(), StoreError> {
        let mut conn = self.store.connection()?;
        reset_database(&mut conn)
    }

    /// Opens or creates the execution named `opts.name`.
    ///
    /// An existing execution is rehydrated from the store; with
    /// `opts.restart` its non-successful tasks are first deleted (after
    /// confirmation unless `opts.skip_confirm`), removing their non-persist
    /// output files from disk, so successful work is preserved verbatim.
    pub fn start(&self, opts: StartOptions) -> Result<Execution, ExecutionError> {
        if !NAME_RE.is_match(&opts.name) {
            return Err(ValidationError::InvalidName(opts.name).into());
        }

        std::fs::create_dir_all(&opts.output_dir).map_err(|source| {
            ConfigurationError::OutputDir {
                path: opts.output_dir.clone(),
                source,
            }
        })?;
        let log = ExecutionLog::open(&opts.output_dir)?;

        let store = self.store.clone();
        let existing = store.transaction(|conn| store.execution().get_by_name(conn, &opts.name))?;

        let row = match existing {
            Some(row) => {
                if opts.restart {
                    if !opts.skip_confirm && !confirm_restart(&opts.name) {
                        return Err(ExecutionError::RestartDeclined(opts.name));
                    }
                    log.info(&format!(
                        "Restarting execution '{}': deleting non-successful tasks",
                        opts.name
                    ));
                    let files = store.transaction(|conn| {
                        store.task().delete_unsuccessful(conn, row.id)
                    })?;
                    for file in files.iter().filter(|f| !f.persist) {
                        let path = Path::new(&file.path);
                        if path.exists() {
                            if let Err(e) = std::fs::remove_file(path) {
                                warn!("Could not remove {}: {}", file.path, e);
                            }
                        }
                    }
                }
                let max_cpus = opts.max_cpus.map(|v| v as i32);
                let max_attempts = opts.max_attempts.max(1) as i32;
                if row.max_cpus != max_cpus || row.max_attempts != max_attempts {
                    store.transaction(|conn| {
                        store
                            .execution()
                            .update_limits(conn, row.id, max_cpus, max_attempts)
                    })?;
                }
                store
                    .transaction(|conn| store.execution().get_by_name(conn, &opts.name))?
                    .ok_or(StoreError::ExecutionNotFound(opts.name.clone()))?
            }
            None => store.transaction(|conn| {
                store.execution().insert(
                    conn,
                    NewExecution {
                        name: opts.name.clone(),
                        output_dir: opts.output_dir.display().to_string(),
                        successful: false,
                        max_cpus: opts.max_cpus.map(|v| v as i32),
                        max_attempts: opts.max_attempts.max(1) as i32,
                        info: "{}".to_string(),
                        status: ExecutionStatus::NoAttempt.as_str().to_string(),
                        created_on: Some(Utc::now().naive_utc()),
                    },
                )
            })?,
        };

        let info: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&row.info).unwrap_or_default();
        let mut execution = Execution::new(
            row.id,
            row.name,
            PathBuf::from(row.output_dir),
            row.max_cpus.map(|v| v as u32),
            row.max_attempts.max(1) as u32,
            row.created_on.map(|d| d.and_utc()),
            row.started_on.map(|d| d.and_utc()),
            row.finished_on.map(|d| d.and_utc()),
            row.successful,
            ExecutionStatus::parse(&row.status).unwrap_or(ExecutionStatus::NoAttempt),
            info,
            self.store.clone(),
            self.default_drm.clone(),
            self.default_queue.clone(),
            self.settings.clone(),
            log,
        );
        execution.hydrate()?;
        Ok(execution)
    }
}

/// Interactive yes/no prompt before a destructive restart.
fn confirm_restart(name: &str) -> bool {
    let mut stderr = std::io::stderr();
    let _ = write!(
        stderr,
        "Restart execution '{}' and delete all of its non-successful tasks? (y/n) ",
        name
    );
    let _ = stderr.flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}
