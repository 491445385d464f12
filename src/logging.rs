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

//! Per-execution log file.
//!
//! Every execution writes a plain-text log at `<output_dir>/execution.log`.
//! Lines are mirrored into `tracing` so they also reach whatever subscriber
//! the process installed via `init_logging`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::{error, info, warn};

/// Buffered writer for `execution.log`, appending across resumptions.
pub struct ExecutionLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl ExecutionLog {
    /// Opens (or creates) `<output_dir>/execution.log` in append mode.
    pub fn open(output_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join("execution.log");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, level: &str, message: &str) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(
                writer,
                "{} {:5} {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                level,
                message
            );
            let _ = writer.flush();
        }
    }

    pub fn info(&self, message: &str) {
        info!("{}", message);
        self.write_line("INFO", message);
    }

    pub fn warn(&self, message: &str) {
        warn!("{}", message);
        self.write_line("WARN", message);
    }

    pub fn error(&self, message: &str) {
        error!("{}", message);
        self.write_line("ERROR", message);
    }

    /// Flushes buffered lines to disk.
    pub fn flush(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}

impl std::fmt::Debug for ExecutionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLog")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_across_reopens() {
        let dir = tempfile::tempdir().unwrap();

        {
            let log = ExecutionLog::open(dir.path()).unwrap();
            log.info("first run");
        }
        {
            let log = ExecutionLog::open(dir.path()).unwrap();
            log.warn("second run");
        }

        let content = std::fs::read_to_string(dir.path().join("execution.log")).unwrap();
        assert!(content.contains("INFO  first run"));
        assert!(content.contains("WARN  second run"));
        let first = content.find("first").unwrap();
        let second = content.find("second").unwrap();
        assert!(first < second);
    }
}
