use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    errors::{AppError, Result},
    utils::{crypto, file::FileRules},
};

/// Lifecycle of an upload job.
///
/// `Idle` is what a session without a chosen file reports; a stored job is
/// always at least `Selected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Selected,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Selected | JobStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Selected => "selected",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidFile,
    QuotaExceeded,
    ProcessingFailed,
    Cancelled,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::InvalidFile => "invalid_file",
            FailureReason::QuotaExceeded => "quota_exceeded",
            FailureReason::ProcessingFailed => "processing_failed",
            FailureReason::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFailure {
    pub reason: FailureReason,
    pub message: String,
}

/// The image a user picked, held in memory for the lifetime of the job.
#[derive(Clone, Serialize)]
pub struct SourceFile {
    pub file_name: String,
    pub media_type: String,
    pub size_bytes: usize,
    #[serde(skip)]
    pub data: Bytes,
}

impl SourceFile {
    pub fn new(file_name: impl Into<String>, media_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            file_name: file_name.into(),
            media_type: media_type.into(),
            size_bytes: data.len(),
            data,
        }
    }

    /// Drops the image bytes, keeping name, type and size for display.
    pub fn release(&mut self) {
        self.data = Bytes::new();
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("file_name", &self.file_name)
            .field("media_type", &self.media_type)
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

/// Opaque pointer to an upscaled result (URL or blob handle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRef(String);

impl ResultRef {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub job_id: Option<Uuid>,
    pub status: JobStatus,
    pub progress: u8,
}

impl JobProgress {
    pub fn idle() -> Self {
        Self {
            job_id: None,
            status: JobStatus::Idle,
            progress: 0,
        }
    }
}

/// Optional body of a start request.
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub scale: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadJob {
    pub id: Uuid,
    pub source: SourceFile,
    pub checksum: String,
    pub status: JobStatus,
    pub progress: u8,
    /// Upscale factor, fixed when processing starts.
    pub scale: Option<u8>,
    pub result: Option<ResultRef>,
    pub failure: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadJob {
    /// Validates `source` and creates a job in `Selected`.
    pub fn select(source: SourceFile, rules: &FileRules) -> Result<Self> {
        rules.validate(&source.media_type, &source.data)?;

        Ok(Self {
            id: Uuid::new_v4(),
            checksum: crypto::calculate_sha256(&source.data),
            source,
            status: JobStatus::Selected,
            progress: 0,
            scale: None,
            result: None,
            failure: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        })
    }

    pub fn begin_processing(&mut self, scale: u8) -> Result<()> {
        if self.status != JobStatus::Selected {
            return Err(self.transition_error("start processing"));
        }
        self.status = JobStatus::Processing;
        self.progress = 0;
        self.scale = Some(scale);
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Applies a progress report, returning false when it was discarded.
    ///
    /// Reports below the last observed value are dropped. While processing the
    /// value is capped at 99 so that 100 is only ever seen on completion.
    pub fn advance(&mut self, reported: u8) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        let value = reported.min(99);
        if value <= self.progress {
            return false;
        }
        self.progress = value;
        true
    }

    pub fn complete(&mut self, result: ResultRef) -> Result<()> {
        if self.status != JobStatus::Processing {
            return Err(self.transition_error("complete"));
        }
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
        self.source.release();
        Ok(())
    }

    pub fn fail(&mut self, reason: FailureReason, message: impl Into<String>) -> Result<()> {
        if !self.status.is_active() {
            return Err(self.transition_error("fail"));
        }
        self.status = JobStatus::Failed;
        self.failure = Some(JobFailure {
            reason,
            message: message.into(),
        });
        self.finished_at = Some(Utc::now());
        self.source.release();
        Ok(())
    }

    pub fn progress_view(&self) -> JobProgress {
        JobProgress {
            job_id: Some(self.id),
            status: self.status,
            progress: self.progress,
        }
    }

    /// Suggested file name for the downloaded result.
    pub fn download_name(&self) -> String {
        format!("upscaled_{}", self.source.file_name)
    }

    fn transition_error(&self, action: &str) -> AppError {
        AppError::InvalidTransition(format!("cannot {} job {} while it is {}", action, self.id, self.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn selected_job() -> UploadJob {
        let source = SourceFile::new("cat.png", "image/png", PNG_HEADER.to_vec());
        UploadJob::select(source, &FileRules::default()).unwrap()
    }

    #[test]
    fn test_select_validates_source() {
        let job = selected_job();
        assert_eq!(job.status, JobStatus::Selected);
        assert_eq!(job.progress, 0);
        assert_eq!(job.source.size_bytes, PNG_HEADER.len());

        let text = SourceFile::new("notes.txt", "text/plain", b"hello".to_vec());
        let err = UploadJob::select(text, &FileRules::default()).unwrap_err();
        assert!(matches!(err, AppError::InvalidFile(_)));
    }

    #[test]
    fn test_select_rejects_oversized_files() {
        let rules = FileRules {
            max_file_size: 8,
            ..FileRules::default()
        };
        let source = SourceFile::new("cat.png", "image/png", PNG_HEADER.to_vec());
        assert!(matches!(UploadJob::select(source, &rules), Err(AppError::InvalidFile(_))));
    }

    #[test]
    fn test_progress_is_monotonic_and_capped_until_completion() {
        let mut job = selected_job();
        assert!(!job.advance(10), "progress before processing must be ignored");

        job.begin_processing(2).unwrap();
        assert!(job.advance(30));
        assert!(!job.advance(20));
        assert!(!job.advance(30));
        assert_eq!(job.progress, 30);

        assert!(job.advance(100));
        assert_eq!(job.progress, 99);
        assert_eq!(job.status, JobStatus::Processing);

        job.complete(ResultRef::new("https://cdn.example/out.png")).unwrap();
        assert_eq!(job.progress, 100);
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.result.is_some());
        assert_eq!(job.scale, Some(2));
    }

    #[test]
    fn test_settled_jobs_release_source_bytes() {
        let mut completed = selected_job();
        completed.begin_processing(4).unwrap();
        completed.complete(ResultRef::new("https://cdn.example/out.png")).unwrap();
        assert!(completed.source.data.is_empty());
        assert_eq!(completed.source.size_bytes, PNG_HEADER.len());
        assert_eq!(completed.download_name(), "upscaled_cat.png");

        let mut cancelled = selected_job();
        cancelled.fail(FailureReason::Cancelled, "cancelled by user").unwrap();
        assert!(cancelled.source.data.is_empty());
    }

    #[test]
    fn test_terminal_jobs_are_immutable() {
        let mut job = selected_job();
        job.begin_processing(2).unwrap();
        job.advance(40);
        job.fail(FailureReason::Cancelled, "cancelled by user").unwrap();

        assert_eq!(job.progress, 40);
        assert!(job.result.is_none());
        assert!(job.fail(FailureReason::ProcessingFailed, "late").is_err());
        assert!(job.complete(ResultRef::new("late")).is_err());
        assert!(job.begin_processing(2).is_err());
        assert!(!job.advance(90));
        assert_eq!(job.failure.as_ref().map(|f| f.reason), Some(FailureReason::Cancelled));
    }

    #[test]
    fn test_cannot_complete_without_processing() {
        let mut job = selected_job();
        assert!(matches!(
            job.complete(ResultRef::new("x")),
            Err(AppError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_source_debug_omits_bytes() {
        let job = selected_job();
        let rendered = format!("{:?}", job.source);
        assert!(rendered.contains("cat.png"));
        assert!(!rendered.contains("IHDR"));
    }
}
