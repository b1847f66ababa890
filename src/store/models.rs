//! Persisted records: uploads and the groups split out of them.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted multi-document PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub id: String,
    pub owner_id: String,
    pub source_path: PathBuf,
    pub status: UploadStatus,
    /// Page count, known once processing completes.
    pub total_pages: Option<u32>,
    pub error_message: Option<String>,
    /// Last reported progress, 0-100.
    pub progress: u8,
    pub progress_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Upload {
    /// A new queued upload.
    pub fn new(id: &str, owner_id: &str, source_path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            source_path,
            status: UploadStatus::Queued,
            total_pages: None,
            error_message: None,
            progress: 0,
            progress_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One logical document extracted from an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    /// Separator code shared by every group of the upload.
    pub code: String,
    /// File label (unique within the upload).
    pub label: String,
    pub pdf_path: PathBuf,
    /// Source page numbers, ascending.
    pub pages: Vec<u32>,
    pub pages_count: u32,
    pub owner_id: String,
    pub upload_id: String,
    pub created_at: DateTime<Utc>,
}

/// Group data prior to insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGroup {
    pub code: String,
    pub label: String,
    pub pdf_path: PathBuf,
    pub pages: Vec<u32>,
    pub owner_id: String,
    pub upload_id: String,
}

impl NewGroup {
    pub fn pages_count(&self) -> u32 {
        self.pages.len() as u32
    }
}
