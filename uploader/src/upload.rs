use bytes::BytesMut;
use coffee_cam_common::config::UploadConfig;
use coffee_cam_common::frame::EncodedImage;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const FIELD_NAME: &str = "image";
pub const FILE_NAME: &str = "snapshot.jpg";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// No HTTP response was received (DNS, connect, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(String),
    /// A response arrived with a non-2xx status.
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Outcome of a single upload attempt. Never persisted.
#[derive(Debug)]
pub struct UploadResult {
    pub succeeded: bool,
    pub http_status: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<UploadError>,
}

impl UploadResult {
    fn transport(error: UploadError) -> Self {
        Self {
            succeeded: false,
            http_status: None,
            response_body: None,
            error: Some(error),
        }
    }

    fn completed(status: u16, body: String) -> Self {
        let succeeded = is_success_status(status);
        Self {
            succeeded,
            http_status: Some(status),
            response_body: Some(body),
            error: (!succeeded).then_some(UploadError::HttpStatus(status)),
        }
    }
}

/// Only 200..=299 counts as a successful upload.
pub fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

/// One upload attempt per call; implementations never retry internally.
pub trait Upload: Send + Sync {
    fn upload(
        &self,
        image: EncodedImage,
        shot: u64,
    ) -> impl Future<Output = UploadResult> + Send;
}

/// Multipart POST of a JPEG to a fixed endpoint.
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: Option<String>,
}

impl HttpUploader {
    pub fn new(config: &UploadConfig) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| UploadError::Client(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            bearer_token: config.bearer_token.clone(),
        })
    }

    fn form(image: EncodedImage) -> Result<Form, UploadError> {
        let part = Part::bytes(image.bytes)
            .file_name(FILE_NAME)
            .mime_str(image.content_type)
            .map_err(|e| UploadError::Client(e.to_string()))?;
        Ok(Form::new().part(FIELD_NAME, part))
    }
}

impl Upload for HttpUploader {
    async fn upload(&self, image: EncodedImage, shot: u64) -> UploadResult {
        info!(
            shot,
            bytes = image.len(),
            width = image.width,
            height = image.height,
            endpoint = self.endpoint,
            "starting upload"
        );

        let form = match Self::form(image) {
            Ok(f) => f,
            Err(e) => return UploadResult::transport(e),
        };
        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        debug!(shot, "sending POST request");
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                return UploadResult::transport(UploadError::Transport(describe(&e)));
            }
        };

        let status = response.status().as_u16();
        info!(shot, status, "POST returned");

        // Accumulate every chunk as it arrives; the body is only ever logged.
        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => body.extend_from_slice(&chunk),
                Err(e) => {
                    warn!(shot, status, error = %describe(&e), "response body truncated");
                    break;
                }
            }
        }
        let body = String::from_utf8_lossy(&body).into_owned();
        info!(shot, status, body = %body, "response body");

        UploadResult::completed(status, body)
    }
}

/// reqwest's Display hides the root cause; walk the source chain.
fn describe(error: &reqwest::Error) -> String {
    use std::error::Error;

    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
