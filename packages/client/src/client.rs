// ABOUTME: Authenticated HTTP client for the generation backend
// ABOUTME: Adds bearer and session headers, retries once after a 401 with a refreshed token

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use livebuild_config::ApiSettings;

use crate::auth::{StaticToken, TokenProvider};
use crate::error::{ClientError, ClientResult};
use crate::types::{
    ChatRequest, Deployment, FilesResponse, InitJobRequest, InitJobResponse, JobResponse,
    JobSnapshot, UploadResponse,
};

pub const SESSION_HEADER: &str = "X-Session-Id";

/// Raw response body chunks of a streaming endpoint.
pub type ByteStream = BoxStream<'static, ClientResult<Bytes>>;

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    deploy_domain: String,
    session_id: Arc<RwLock<String>>,
    tokens: Arc<dyn TokenProvider>,
}

impl ApiClient {
    pub fn new(
        settings: &ApiSettings,
        session_id: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ClientError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            deploy_domain: settings.deploy_domain.clone(),
            session_id: Arc::new(RwLock::new(session_id.into())),
            tokens,
        })
    }

    /// Client authenticated with the token from settings, if any.
    pub fn from_settings(settings: &ApiSettings, session_id: impl Into<String>) -> ClientResult<Self> {
        let tokens = Arc::new(StaticToken::new(settings.access_token.clone()));
        Self::new(settings, session_id, tokens)
    }

    /// Client without a response timeout, for long-lived streaming bodies.
    pub fn streaming(&self) -> ClientResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ClientError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            ..self.clone()
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session_id(&self) -> String {
        self.session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_session_id(&self, session_id: impl Into<String>) {
        *self
            .session_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = session_id.into();
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder, session_id: &str, token: Option<&str>) -> RequestBuilder {
        let request = request.header(SESSION_HEADER, session_id);
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request, retrying exactly once with a refreshed token on 401.
    async fn send<F>(&self, session_id: &str, build: F) -> ClientResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let token = self.tokens.access_token().await?;
        let response = self
            .authorize(build(&self.http), session_id, token.as_deref())
            .send()
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("Backend rejected access token, refreshing and retrying once");
        let refreshed = self.tokens.refresh().await?;
        let retry = self
            .authorize(build(&self.http), session_id, refreshed.as_deref())
            .send()
            .await?;

        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        Ok(retry)
    }

    async fn check(response: Response) -> ClientResult<Response> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(response.url().path().to_string())),
            StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized),
            status => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| status.to_string());
                Err(ClientError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    /// Fetch the generated file manifest. `Ok(None)` means the backend has
    /// not produced files yet (404).
    pub async fn get_files(&self) -> ClientResult<Option<Value>> {
        let url = self.url("/files");
        let session_id = self.session_id();
        let response = self.send(&session_id, |http| http.get(&url)).await?;

        match Self::check(response).await {
            Ok(response) => {
                let body: FilesResponse = response.json().await?;
                Ok(Some(body.files))
            }
            Err(ClientError::NotFound(_)) => {
                debug!("File manifest not ready for session {}", session_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn init_job(&self, session_id: &str, payload: &Value) -> ClientResult<InitJobResponse> {
        let url = self.url("/jobs/init");
        let body = InitJobRequest {
            session_id,
            payload,
        };
        let response = self
            .send(session_id, |http| http.post(&url).json(&body))
            .await?;
        let init: InitJobResponse = Self::check(response).await?.json().await?;
        info!("Started job {} for session {}", init.job_id, session_id);
        Ok(init)
    }

    pub async fn get_job(&self, session_id: &str, job_id: &str) -> ClientResult<JobSnapshot> {
        let url = self.url(&format!("/jobs/{}", job_id));
        let response = self.send(session_id, |http| http.get(&url)).await?;
        let body: JobResponse = Self::check(response).await?.json().await?;
        Ok(body.job)
    }

    /// Open the follow-up chat stream and hand back its body as raw chunks.
    pub async fn open_chat_stream(&self, session_id: &str, message: &str) -> ClientResult<ByteStream> {
        let url = self.url("/chat/stream");
        let body = ChatRequest { message };
        let response = self
            .send(session_id, |http| http.post(&url).json(&body))
            .await?;
        let response = Self::check(response).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from))
            .boxed())
    }

    pub async fn deploy(&self, target: &str) -> ClientResult<Deployment> {
        let url = self.url(&format!("/deploy/{}", target));
        let session_id = self.session_id();
        let response = self.send(&session_id, |http| http.post(&url)).await?;
        Self::check(response).await?;

        let deployment = Deployment {
            target: target.to_string(),
            url: format!("https://{}.{}", session_id, self.deploy_domain),
        };
        info!("Deployed session {} to {}", session_id, deployment.url);
        Ok(deployment)
    }

    pub async fn upload_image(&self, file_name: &str, bytes: Vec<u8>) -> ClientResult<UploadResponse> {
        let url = self.url("/uploads/images");
        let session_id = self.session_id();
        let mime = mime_for(file_name);

        let response = self
            .send(&session_id, |http| {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(file_name.to_string());
                // Falls back to no content type if the guess is rejected
                let part = match part.mime_str(mime.as_ref()) {
                    Ok(part) => part,
                    Err(_) => reqwest::multipart::Part::bytes(bytes.clone())
                        .file_name(file_name.to_string()),
                };
                http.post(&url)
                    .multipart(reqwest::multipart::Form::new().part("file", part))
            })
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }
}

fn mime_for(file_name: &str) -> mime::Mime {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "svg" => mime::IMAGE_SVG,
        "bmp" => mime::IMAGE_BMP,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}
