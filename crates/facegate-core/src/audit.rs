//! Append-only access audit log, one file per calendar day.
//!
//! Line format:
//!
//! ```text
//! 2026-10-16 14:03:07 | GRANTED | Alice | 75.0% | Medio
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FIELD_SEPARATOR: &str = " | ";
/// Written in place of a display name when no identity was granted.
pub const UNKNOWN_IDENTITY: &str = "Unknown";

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit log I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed audit line: {0}")]
    Malformed(String),
}

/// Classification of one authentication cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Granted,
    Denied,
    NoFace,
    MultiFace,
    Untrained,
}

impl Outcome {
    pub fn token(self) -> &'static str {
        match self {
            Outcome::Granted => "GRANTED",
            Outcome::Denied => "DENIED",
            Outcome::NoFace => "NO_FACE",
            Outcome::MultiFace => "MULTI_FACE",
            Outcome::Untrained => "UNTRAINED",
        }
    }

    /// Granted and Denied are attempts; the rest are not.
    pub fn is_attempt(self) -> bool {
        matches!(self, Outcome::Granted | Outcome::Denied)
    }
}

impl FromStr for Outcome {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GRANTED" => Ok(Outcome::Granted),
            "DENIED" => Ok(Outcome::Denied),
            "NO_FACE" => Ok(Outcome::NoFace),
            "MULTI_FACE" => Ok(Outcome::MultiFace),
            "UNTRAINED" => Ok(Outcome::Untrained),
            other => Err(AuditError::Malformed(format!("unknown outcome '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessAttempt {
    /// Local wall-clock time.
    pub timestamp: NaiveDateTime,
    pub outcome: Outcome,
    /// Display name of the granted identity.
    pub identity: Option<String>,
    pub confidence: f32,
    pub profile: String,
}

impl AccessAttempt {
    pub fn now(outcome: Outcome, identity: Option<String>, confidence: f32, profile: &str) -> Self {
        Self {
            timestamp: chrono::Local::now().naive_local(),
            outcome,
            identity,
            confidence,
            profile: profile.to_string(),
        }
    }

    pub fn to_line(&self) -> String {
        let name = self
            .identity
            .as_deref()
            .map(sanitize_field)
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string());
        [
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            self.outcome.token().to_string(),
            name,
            format!("{:.1}%", self.confidence),
            sanitize_field(&self.profile),
        ]
        .join(FIELD_SEPARATOR)
    }

    pub fn parse_line(line: &str) -> Result<Self, AuditError> {
        let malformed = || AuditError::Malformed(line.to_string());
        let fields: Vec<&str> = line.trim_end().split(FIELD_SEPARATOR).collect();
        let [timestamp, outcome, name, confidence, profile] = fields[..] else {
            return Err(malformed());
        };

        let timestamp =
            NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).map_err(|_| malformed())?;
        let confidence = confidence
            .strip_suffix('%')
            .and_then(|c| c.parse::<f32>().ok())
            .ok_or_else(malformed)?;
        // A grant always names its identity, even one called "Unknown".
        let outcome: Outcome = outcome.parse()?;
        let identity =
            (outcome == Outcome::Granted || name != UNKNOWN_IDENTITY).then(|| name.to_string());

        Ok(Self {
            timestamp,
            outcome,
            identity,
            confidence,
            profile: profile.to_string(),
        })
    }
}

/// Keep one attempt on one parseable line.
fn sanitize_field(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '|' => '/',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect()
}

/// Writes attempts to `<dir>/access_log_YYYYMMDD.txt` and keeps the
/// attempts of this process in memory.
pub struct AuditLog {
    dir: PathBuf,
    history: Vec<AccessAttempt>,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            history: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("access_log_{}.txt", date.format("%Y%m%d")))
    }

    /// Append one attempt. The file of the attempt's own date is opened in
    /// append mode, so existing lines are never touched.
    pub fn record(&mut self, attempt: AccessAttempt) -> Result<(), AuditError> {
        let path = self.file_for(attempt.timestamp.date());
        let line = attempt.to_line();
        self.history.push(attempt);

        let io_err = |source| AuditError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        writeln!(file, "{line}").map_err(io_err)?;
        Ok(())
    }

    /// Attempts recorded by this process, oldest first.
    pub fn history(&self) -> &[AccessAttempt] {
        &self.history
    }

    /// Read back every attempt of `date`. A day without a file is empty.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<AccessAttempt>, AuditError> {
        let path = self.file_for(date);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(AuditError::Io { path, source }),
        };
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(AccessAttempt::parse_line)
            .collect()
    }
}
