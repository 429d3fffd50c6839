use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::warn;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_DELIMITER: &str = ";";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no data")]
    NoData,
    #[error("malformed log record {line:?}: {reason}")]
    Parse { line: String, reason: String },
    #[error("task label {0:?} cannot be stored with this delimiter")]
    InvalidLabel(String),
}

impl StorageError {
    /// True for the errors that mean "nothing usable stored yet".
    pub fn is_absent_data(&self) -> bool {
        matches!(self, StorageError::NoData | StorageError::Parse { .. })
    }
}

/// One persisted record: how many seconds were spent on a task label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub task_label: String,
    pub seconds: u64,
}

impl LogEntry {
    pub fn new(task_label: impl Into<String>, seconds: u64) -> Self {
        Self {
            task_label: task_label.into(),
            seconds,
        }
    }

    pub fn to_line(&self, delimiter: &str) -> Result<String, StorageError> {
        if self.task_label.contains(delimiter) || self.task_label.contains('\n') {
            return Err(StorageError::InvalidLabel(self.task_label.clone()));
        }
        Ok(format!("{}{}{}\n", self.task_label, delimiter, self.seconds))
    }

    pub fn parse(line: &str, delimiter: &str) -> Result<Self, StorageError> {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let malformed = |reason: String| StorageError::Parse {
            line: trimmed.to_string(),
            reason,
        };

        let fields = trimmed.split(delimiter).collect::<Vec<_>>();
        if fields.len() != 2 {
            return Err(malformed(format!(
                "expected 2 fields, found {}",
                fields.len()
            )));
        }
        if fields[0].is_empty() {
            return Err(malformed("empty task label".to_string()));
        }

        // `u64::from_str` alone would accept a leading `+`.
        let raw_seconds = fields[1];
        if raw_seconds.is_empty() || !raw_seconds.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(malformed(format!("invalid seconds {raw_seconds:?}")));
        }
        let seconds = raw_seconds
            .parse::<u64>()
            .map_err(|err| malformed(format!("invalid seconds: {err}")))?;

        Ok(Self::new(fields[0], seconds))
    }
}

/// Append-only, line-oriented task log on disk.
///
/// Every operation reads the file fresh; the file is only created by the
/// first write.
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
    delimiter: String,
}

impl LogStore {
    pub fn open(path: impl Into<PathBuf>, delimiter: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            delimiter: delimiter.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds one record at the end. A torn last line (no trailing newline) is
    /// closed off first so the new record never joins it.
    pub fn append(&self, entry: &LogEntry) -> Result<(), StorageError> {
        let mut line = entry.to_line(&self.delimiter)?;
        ensure_parent(&self.path)?;
        if ends_without_newline(&self.path)? {
            line.insert(0, '\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    pub fn size(&self) -> Result<usize, StorageError> {
        Ok(self.lines()?.len())
    }

    pub fn last(&self) -> Result<LogEntry, StorageError> {
        self.get_row(None)
    }

    /// Reads one record; `None` addresses the most recent one.
    pub fn get_row(&self, index: Option<usize>) -> Result<LogEntry, StorageError> {
        let lines = self.lines()?;
        let index = match index {
            Some(index) => index,
            None => lines.len().checked_sub(1).ok_or(StorageError::NoData)?,
        };
        let line = lines.get(index).ok_or(StorageError::NoData)?;
        LogEntry::parse(line, &self.delimiter)
    }

    /// All well-formed records in append order.
    pub fn entries(&self) -> Result<Vec<LogEntry>, StorageError> {
        let mut entries = Vec::new();
        for (number, line) in self.lines()?.iter().enumerate() {
            match LogEntry::parse(line, &self.delimiter) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!("skipping log line {}: {err}", number + 1),
            }
        }
        Ok(entries)
    }

    /// Removes the most recent record and returns what it held, if anything
    /// parseable was there.
    pub fn delete_last(&self) -> Result<Option<LogEntry>, StorageError> {
        let mut lines = self.lines()?;
        let Some(removed) = lines.pop() else {
            return Ok(None);
        };

        self.rewrite(join_lines(&lines))?;
        Ok(LogEntry::parse(&removed, &self.delimiter).ok())
    }

    /// Swaps the most recent record for `entry`. The log is either fully
    /// replaced or left as it was.
    pub fn replace_last(&self, entry: &LogEntry) -> Result<(), StorageError> {
        let line = entry.to_line(&self.delimiter)?;
        let mut lines = self.lines()?;
        if lines.pop().is_none() {
            return Err(StorageError::NoData);
        }

        let mut content = join_lines(&lines);
        content.push_str(&line);
        self.rewrite(content)
    }

    /// Writes `content` to a sibling file and renames it over the log.
    fn rewrite(&self, content: String) -> Result<(), StorageError> {
        let tmp = self.tmp_path();
        if let Err(err) = fs::write(&tmp, content) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("log"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        ensure_parent(&self.path)?;
        fs::File::create(&self.path)?;
        Ok(())
    }

    fn lines(&self) -> Result<Vec<String>, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::Io(err)),
        };

        Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn join_lines(lines: &[String]) -> String {
    let mut content = String::new();
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    content
}

fn ends_without_newline(path: &Path) -> Result<bool, StorageError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Total seconds per task label, largest first.
pub fn summarize(entries: &[LogEntry]) -> Vec<(String, u64)> {
    let mut totals: HashMap<String, u64> = HashMap::new();
    for entry in entries {
        let total = totals.entry(entry.task_label.clone()).or_insert(0);
        *total = total.saturating_add(entry.seconds);
    }

    let mut rows = totals.into_iter().collect::<Vec<_>>();
    rows.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
    rows
}
