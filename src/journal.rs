use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};
use crate::model::{EventRecord, RecordError};

/// Parse outcome of one stored line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Valid(EventRecord),
    /// Kept so an editor can still show and repair the line.
    Malformed(RecordError),
}

/// One non-empty line read back from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Label of the store the line came from.
    pub store: String,
    /// Position among the store's non-empty lines.
    pub line_index: usize,
    /// Trimmed line text, undecodable bytes replaced.
    pub raw: String,
    pub parsed: Parsed,
}

impl LogEntry {
    pub fn record(&self) -> Option<&EventRecord> {
        match &self.parsed {
            Parsed::Valid(record) => Some(record),
            Parsed::Malformed(_) => None,
        }
    }
}

/// One physical line exactly as stored, terminator excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLine(Vec<u8>);

impl StoredLine {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Trimmed text, or [`RecordError::NotUtf8`].
    pub fn text(&self) -> Result<&str, RecordError> {
        std::str::from_utf8(&self.0)
            .map(str::trim)
            .map_err(|e| RecordError::NotUtf8(e.valid_up_to()))
    }

    /// Trimmed text with undecodable bytes replaced by U+FFFD.
    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).trim().to_string()
    }

    pub fn is_blank(&self) -> bool {
        String::from_utf8_lossy(&self.0).trim().is_empty()
    }

    pub fn parse(&self) -> Result<EventRecord, RecordError> {
        EventRecord::parse_line(self.text()?)
    }
}

impl From<String> for StoredLine {
    fn from(line: String) -> Self {
        Self(line.into_bytes())
    }
}

/// How a rewrite located its target line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineMatch {
    /// The raw text was found verbatim.
    Exact,
    /// Fallback: a line with equal event, job and timestamp.
    Structural,
}

/// Phase one of the line matcher: identity on trimmed text.
pub fn find_exact<S: AsRef<str>>(lines: &[S], raw: &str) -> Option<usize> {
    let raw = raw.trim();
    lines.iter().position(|line| line.as_ref().trim() == raw)
}

/// Phase two of the line matcher: equality on `(event, job, timestamp)`.
///
/// Only applies when `raw` itself parses; a malformed original can only be
/// found verbatim.
pub fn find_structural<S: AsRef<str>>(lines: &[S], raw: &str) -> Option<usize> {
    let target = EventRecord::parse_line(raw).ok()?;
    lines.iter().position(|line| {
        EventRecord::parse_line(line.as_ref()).is_ok_and(|record| record.same_identity(&target))
    })
}

/// Run both matcher phases in order.
pub fn locate<S: AsRef<str>>(lines: &[S], raw: &str) -> Option<(usize, LineMatch)> {
    find_exact(lines, raw)
        .map(|i| (i, LineMatch::Exact))
        .or_else(|| find_structural(lines, raw).map(|i| (i, LineMatch::Structural)))
}

/// A single line-oriented event log file.
#[derive(Debug, Clone)]
pub struct LogFile {
    path: PathBuf,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, creating the parent directory if needed.
    pub fn append(&self, record: &EventRecord) -> StoreResult<()> {
        ensure_parent(&self.path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::write(&self.path, e))?;
        writeln!(&mut file, "{}", record.to_line()).map_err(|e| StoreError::write(&self.path, e))?;
        file.sync_all().map_err(|e| StoreError::write(&self.path, e))?;
        Ok(())
    }

    /// Every physical line, blank ones included, exactly as stored. A
    /// missing file reads as empty.
    pub fn read_stored(&self) -> StoreResult<Vec<StoredLine>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::read(&self.path, e)),
        };
        let mut lines: Vec<StoredLine> = bytes
            .split(|b| *b == b'\n')
            .map(|line| StoredLine(line.to_vec()))
            .collect();
        // The final terminator leaves an empty tail behind.
        if bytes.is_empty() || bytes.ends_with(b"\n") {
            lines.pop();
        }
        Ok(lines)
    }

    /// Non-empty trimmed lines, undecodable bytes replaced.
    pub fn read_lines(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .read_stored()?
            .iter()
            .filter(|line| !line.is_blank())
            .map(StoredLine::lossy)
            .collect())
    }

    /// Read and parse every non-blank line, tagging entries with `store`.
    pub fn read_entries(&self, store: &str) -> StoreResult<Vec<LogEntry>> {
        let entries = self
            .read_stored()?
            .iter()
            .filter(|line| !line.is_blank())
            .enumerate()
            .map(|(line_index, line)| {
                let parsed = match line.parse() {
                    Ok(record) => Parsed::Valid(record),
                    Err(err) => {
                        tracing::warn!(
                            store,
                            line = line_index,
                            error = %err,
                            "malformed log line"
                        );
                        Parsed::Malformed(err)
                    }
                };
                LogEntry {
                    store: store.to_string(),
                    line_index,
                    raw: line.lossy(),
                    parsed,
                }
            })
            .collect();
        Ok(entries)
    }

    /// Atomically replace the file's contents with `lines`.
    pub fn write_stored(&self, lines: &[StoredLine]) -> StoreResult<()> {
        let dir = ensure_parent(&self.path)?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| StoreError::write(&self.path, e))?;
        for line in lines {
            tmp.write_all(line.as_bytes())
                .and_then(|()| tmp.write_all(b"\n"))
                .map_err(|e| StoreError::write(&self.path, e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::write(&self.path, e))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::write(&self.path, e.error))?;
        Ok(())
    }

    /// Replace the line matching `original_raw` with `new_record`. Every
    /// other line is written back byte-for-byte.
    ///
    /// Returns `None`, leaving the file untouched, when nothing matches.
    pub fn rewrite_line(
        &self,
        original_raw: &str,
        new_record: &EventRecord,
    ) -> StoreResult<Option<LineMatch>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut lines = self.read_stored()?;
        let (positions, texts): (Vec<usize>, Vec<String>) = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.is_blank())
            .map(|(position, line)| (position, line.lossy()))
            .unzip();
        let Some((found, how)) = locate(&texts, original_raw) else {
            return Ok(None);
        };
        let index = positions[found];
        lines[index] = new_record.to_line().into();
        self.write_stored(&lines)?;
        tracing::debug!(path = %self.path.display(), index, ?how, "rewrote log line");
        Ok(Some(how))
    }

    /// Point every record of job `old` at `new`. Other lines, malformed and
    /// blank ones included, are written back byte-for-byte. Returns the
    /// number of records changed.
    pub fn rename_job(&self, old: &str, new: &str) -> StoreResult<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let mut changed = 0;
        let mut lines = self.read_stored()?;
        for line in &mut lines {
            if let Ok(mut record) = line.parse()
                && record.job == old
            {
                record.job = new.to_string();
                *line = record.to_line().into();
                changed += 1;
            }
        }
        if changed > 0 {
            self.write_stored(&lines)?;
        }
        Ok(changed)
    }
}

/// Create the parent directory of `path` and return it.
pub(crate) fn ensure_parent(path: &Path) -> StoreResult<PathBuf> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| StoreError::create_dir(&dir, e))?;
    Ok(dir)
}
