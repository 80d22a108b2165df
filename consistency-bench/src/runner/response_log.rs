//! Append-only response log
//!
//! One JSON record per line. Every append is written and synced before it is
//! acknowledged, so a crash never loses an acknowledged response and never
//! leaves more than one partial trailing line, which readers skip.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::problems::{Problem, VariantKey};
use crate::providers::FailureClass;

/// Error type for response log access
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("IO error on response log: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error on response log: {0}")]
    Json(#[from] serde_json::Error),
}

/// One addressable call: a (problem, variant, repetition) triple for one model
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryRequest {
    pub model_id: String,
    pub problem_id: String,
    pub variant: VariantKey,
    pub repetition: u32,
}

impl QueryRequest {
    pub fn new(
        model_id: impl Into<String>,
        problem_id: impl Into<String>,
        variant: VariantKey,
        repetition: u32,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            problem_id: problem_id.into(),
            variant,
            repetition,
        }
    }
}

impl std::fmt::Display for QueryRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}#{}",
            self.model_id, self.problem_id, self.variant, self.repetition
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    Failed,
}

/// The stored outcome of a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: QueryStatus,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<FailureClass>,
    pub latency_ms: u64,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl QueryResponse {
    pub fn success(text: impl Into<String>, latency_ms: u64, attempts: u32) -> Self {
        Self {
            status: QueryStatus::Success,
            text: text.into(),
            error: None,
            failure_class: None,
            latency_ms,
            attempts,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        error: impl Into<String>,
        class: FailureClass,
        latency_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            status: QueryStatus::Failed,
            text: String::new(),
            error: Some(error.into()),
            failure_class: Some(class),
            latency_ms,
            attempts,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }
}

/// A request together with its response, as stored in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub request: QueryRequest,
    pub response: QueryResponse,
    /// Hash of the variant text that was asked; absent in hand-written logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl ResponseRecord {
    pub fn new(request: QueryRequest, response: QueryResponse) -> Self {
        Self {
            request,
            response,
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, variant_text: &str) -> Self {
        self.fingerprint = Some(fingerprint(variant_text));
        self
    }

    /// False when the record answers a different wording than `variant_text`
    pub fn answers(&self, variant_text: &str) -> bool {
        self.fingerprint
            .as_deref()
            .map_or(true, |fp| fp == fingerprint(variant_text))
    }
}

/// SHA-256 of a variant text, hex encoded and shortened to 16 digits
pub fn fingerprint(variant_text: &str) -> String {
    let digest = Sha256::digest(variant_text.as_bytes());
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

/// Serialized single-writer handle on the log file
pub struct ResponseLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ResponseLog {
    /// Open (or create) the log for appending
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await?;

        // Terminate a partial line left by an interrupted write so the next
        // record starts on its own line
        let len = file.metadata().await?.len();
        if len > 0 {
            file.seek(std::io::SeekFrom::Start(len - 1)).await?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                tracing::warn!("Response log {} ends mid-record; sealing it", path.display());
                file.write_all(b"\n").await?;
                file.flush().await?;
                file.sync_data().await?;
            }
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record; returns once it is durable
    pub async fn append(&self, record: &ResponseRecord) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Read every well-formed record; a missing file is an empty log
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<ResponseRecord>, LogError> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_records(&content, path))
    }
}

fn parse_records(content: &str, path: &Path) -> Vec<ResponseRecord> {
    let mut records = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ResponseRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(
                "Skipping unreadable line {} of {}: {}",
                lineno + 1,
                path.display(),
                e
            ),
        }
    }
    records
}

/// Triples that already have a successful response to the wording `problems` asks now
pub fn completed_keys(records: &[ResponseRecord], problems: &[Problem]) -> HashSet<QueryRequest> {
    let by_id: HashMap<&str, &Problem> = problems.iter().map(|p| (p.id.as_str(), p)).collect();
    let mut stale = 0usize;
    let done: HashSet<QueryRequest> = records
        .iter()
        .filter(|r| r.response.is_success())
        .filter(|r| match by_id.get(r.request.problem_id.as_str()) {
            Some(problem) if !r.answers(problem.paraphrases.get(r.request.variant)) => {
                stale += 1;
                false
            }
            _ => true,
        })
        .map(|r| r.request.clone())
        .collect();
    if stale > 0 {
        tracing::warn!("{} logged responses answer a different wording and will be re-queried", stale);
    }
    done
}
