// ABOUTME: Wire types exchanged with the generation backend
// ABOUTME: Job status, job events, init/deploy/upload payloads

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Status reported by the backend for a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One unit of progress reported by a job. Ids are unique per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    #[serde(default)]
    pub events: Vec<JobEvent>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobResponse {
    pub job: JobSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitJobRequest<'a> {
    pub session_id: &'a str,
    pub payload: &'a Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InitJobResponse {
    #[serde(deserialize_with = "string_or_number")]
    pub job_id: String,
    #[serde(default)]
    pub landing_page_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FilesResponse {
    pub files: Value,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub message: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub target: String,
    pub url: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}
