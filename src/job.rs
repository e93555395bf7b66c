use super::MangadexError;
use crate::export::ExportFormat;
use crate::model::Chapter;
use getset::Getters;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Downloading,
    Exported,
    /// The target already existed and replacing was not requested.
    Skipped,
    Failed(String),
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Downloading => write!(f, "downloading"),
            JobState::Exported => write!(f, "exported"),
            JobState::Skipped => write!(f, "skipped"),
            JobState::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Chapters that are downloaded together and exported to one target.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct DownloadJob {
    name: String,
    chapters: Vec<Chapter>,
    format: ExportFormat,
    target: PathBuf,
    state: JobState,
}

impl DownloadJob {
    pub fn new(
        name: impl ToString,
        chapters: Vec<Chapter>,
        format: ExportFormat,
        target: impl AsRef<Path>,
    ) -> Self {
        Self {
            name: name.to_string(),
            chapters,
            format,
            target: target.as_ref().to_path_buf(),
            state: JobState::Pending,
        }
    }

    pub fn start(&mut self) -> Result<(), MangadexError> {
        self.transition(JobState::Downloading)
    }

    pub fn finish(&mut self) -> Result<(), MangadexError> {
        self.transition(JobState::Exported)
    }

    pub fn skip(&mut self) -> Result<(), MangadexError> {
        self.transition(JobState::Skipped)
    }

    pub fn fail(&mut self, reason: impl ToString) -> Result<(), MangadexError> {
        self.transition(JobState::Failed(reason.to_string()))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, JobState::Failed(_))
    }

    fn transition(&mut self, to: JobState) -> Result<(), MangadexError> {
        let allowed = matches!(
            (&self.state, &to),
            (JobState::Pending, JobState::Downloading)
                | (JobState::Pending, JobState::Skipped)
                | (JobState::Pending, JobState::Failed(_))
                | (JobState::Downloading, JobState::Exported)
                | (JobState::Downloading, JobState::Failed(_))
        );
        if !allowed {
            return Err(MangadexError::InvalidTransition {
                name: self.name.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }
}
