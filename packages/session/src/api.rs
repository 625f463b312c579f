// ABOUTME: Backend seams used by the session coordinator and follow-up consumer
// ABOUTME: ApiClient implements both; tests substitute scripted implementations

use async_trait::async_trait;
use serde_json::Value;

use livebuild_client::{ApiClient, ByteStream, ClientResult, InitJobResponse, JobSnapshot};

#[async_trait]
pub trait BuildApi: Send + Sync {
    async fn init_job(&self, session_id: &str, payload: &Value) -> ClientResult<InitJobResponse>;
    async fn get_job(&self, session_id: &str, job_id: &str) -> ClientResult<JobSnapshot>;
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn open_chat_stream(&self, session_id: &str, message: &str) -> ClientResult<ByteStream>;
}

#[async_trait]
impl BuildApi for ApiClient {
    async fn init_job(&self, session_id: &str, payload: &Value) -> ClientResult<InitJobResponse> {
        ApiClient::init_job(self, session_id, payload).await
    }

    async fn get_job(&self, session_id: &str, job_id: &str) -> ClientResult<JobSnapshot> {
        ApiClient::get_job(self, session_id, job_id).await
    }
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn open_chat_stream(&self, session_id: &str, message: &str) -> ClientResult<ByteStream> {
        ApiClient::open_chat_stream(self, session_id, message).await
    }
}
