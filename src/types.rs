use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Final recommendation returned by the analysis provider.
///
/// The verdict is authored by the provider and is not derivable from the
/// individual boolean checks; callers must treat it as an independent field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approved,
    Rejected,
    ManualReview,
}

/// Outcome of one identity analysis, real or demo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub is_id_valid: bool,
    pub is_name_match: bool,
    pub is_face_match: bool,
    /// Confidence from 0 to 100.
    pub confidence_score: u8,
    pub extracted_name: String,
    pub reasoning: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Completed,
    Failed,
}

/// One finalized verification attempt. Immutable once appended to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSession {
    pub id: String,
    /// RFC-3339 creation instant.
    pub timestamp: String,
    pub status: SessionStatus,
    pub user_provided_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<VerificationResult>,
}

/// Ordinal state of the intake flow. Strictly ordered; the flow never skips
/// backward except through an explicit restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Details,
    UploadId,
    UploadSelfie,
    Analysis,
    Results,
}

/// Where an uploaded image's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Memory(Vec<u8>),
    File(PathBuf),
}

/// An image handed to the flow: an ID document scan or a selfie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub source: ImageSource,
    pub mime_type: String,
    pub file_name: String,
}

impl CapturedImage {
    pub fn from_bytes(
        bytes: Vec<u8>,
        mime_type: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            source: ImageSource::Memory(bytes),
            mime_type: mime_type.into(),
            file_name: file_name.into(),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Self {
            source: ImageSource::File(path),
            mime_type: mime_type.into(),
            file_name,
        }
    }
}
