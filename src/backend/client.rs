//! Backend API client
//!
//! HTTP client for the document question-answering backend. One instance is
//! built at startup and shared by every handler through `AppState`.

use std::path::Path;
use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{
    header::AUTHORIZATION,
    multipart::{Form, Part},
    RequestBuilder, StatusCode, Url,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, instrument, warn};

use crate::{
    backend::models::{error_message, CreateChatForm, LoginForm, SignupRequest, TokenResponse},
    config::Config,
    error::{AppError, AppResult},
    middleware::Credential,
    routes::metrics::record_upstream,
};

/// Stream of raw answer bytes from the backend
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Backend API client
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl BackendClient {
    /// Create a new backend client
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.backend_url.clone(),
            request_timeout: config.upstream_timeout,
        }
    }

    /// Register a new user
    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn signup(&self, request: &SignupRequest) -> AppResult<Value> {
        let url = self.endpoint(&["auth", "signup"])?;
        let builder = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .json(request);

        let response = self.send("signup", builder).await?;
        read_json("signup", response).await
    }

    /// Exchange username and password for an access token
    ///
    /// The backend answers bad credentials with 400/401/403; those become
    /// `InvalidCredentials` rather than a generic rejection.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> AppResult<TokenResponse> {
        let url = self.endpoint(&["auth", "login"])?;
        let builder = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .form(&LoginForm { username, password });

        let response = match self.send("login", builder).await {
            Ok(response) => response,
            Err(AppError::UpstreamRejected { status, .. })
                if matches!(status, 400 | 401 | 403) =>
            {
                return Err(AppError::InvalidCredentials);
            }
            Err(e) => return Err(e),
        };

        read_json("login", response).await
    }

    /// Create a chat owned by the credential's user
    #[instrument(skip(self, credential), fields(token_fp = %credential.fingerprint()))]
    pub async fn create_chat(&self, credential: &Credential, chat_name: &str) -> AppResult<Value> {
        let url = self.endpoint(&["chat"])?;
        let builder = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .header(AUTHORIZATION, credential.header_value())
            .form(&CreateChatForm { chat_name });

        let response = self.send("create_chat", builder).await?;
        read_json("create_chat", response).await
    }

    /// List the credential's chats
    #[instrument(skip(self, credential), fields(token_fp = %credential.fingerprint()))]
    pub async fn list_chats(&self, credential: &Credential) -> AppResult<Value> {
        let url = self.endpoint(&["chats"])?;
        let builder = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .header(AUTHORIZATION, credential.header_value());

        let response = self.send("list_chats", builder).await?;
        read_json("list_chats", response).await
    }

    /// Fetch the summary of a chat
    #[instrument(skip(self))]
    pub async fn chat_summary(&self, chat_id: &str) -> AppResult<Value> {
        let url = self.endpoint(&["chat_summary", chat_id])?;
        let builder = self.client.get(url).timeout(self.request_timeout);

        let response = self.send("chat_summary", builder).await?;
        read_json("chat_summary", response).await
    }

    /// Send a spooled upload to the backend for processing
    ///
    /// The file is streamed from disk rather than loaded into memory.
    #[instrument(skip(self, credential, path), fields(token_fp = %credential.fingerprint()))]
    pub async fn process_upload(
        &self,
        credential: &Credential,
        chat_id: &str,
        path: &Path,
        file_name: &str,
    ) -> AppResult<Value> {
        let url = self.endpoint(&["process"])?;

        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        debug!(path = %path.display(), bytes = len, "Forwarding upload to backend");

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let form = Form::new()
            .part("file", Part::stream_with_length(body, len).file_name(file_name.to_string()))
            .text("chat_id", chat_id.to_string());

        let builder = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .header(AUTHORIZATION, credential.header_value())
            .multipart(form);

        let response = self.send("process", builder).await?;
        read_json("process", response).await
    }

    /// Ask a question and return the raw answer stream
    ///
    /// No total timeout is applied here: answers may stream for a long time.
    /// The relay bounds the wait for headers and the gaps between chunks with
    /// its idle timeout instead. Dropping the returned stream closes the
    /// upstream connection.
    #[instrument(skip(self, credential, question), fields(token_fp = %credential.fingerprint()))]
    pub async fn ask_stream(
        &self,
        credential: &Credential,
        chat_id: &str,
        question: &str,
    ) -> AppResult<ByteStream> {
        let url = self.endpoint(&["ask"])?;
        let form = Form::new()
            .text("question", question.to_string())
            .text("chat_id", chat_id.to_string());

        let builder = self
            .client
            .post(url)
            .header(AUTHORIZATION, credential.header_value())
            .multipart(form);

        let response = self.send("ask", builder).await?;
        Ok(response.bytes_stream().boxed())
    }

    /// Send a request and classify the outcome
    ///
    /// Non-2xx responses become `UpstreamRejected` (or `Validation` for 422);
    /// transport failures become `UpstreamUnavailable` / `UpstreamTimeout`.
    async fn send(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> AppResult<reqwest::Response> {
        let start = Instant::now();

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let err = AppError::from(e);
                error!(operation, error = %err, "Backend request failed");
                let outcome = match err {
                    AppError::UpstreamTimeout(_) => "timeout",
                    _ => "unavailable",
                };
                record_upstream(operation, outcome, start.elapsed().as_secs_f64());
                return Err(err);
            }
        };

        let status = response.status();
        debug!(operation, status = %status, "Backend response status");

        if status.is_success() {
            record_upstream(operation, "success", start.elapsed().as_secs_f64());
            return Ok(response);
        }

        record_upstream(operation, "rejected", start.elapsed().as_secs_f64());
        let text = response.text().await.unwrap_or_default();
        let message = error_message(&text);
        warn!(operation, status = %status, message = %message, "Backend rejected request");

        if status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(AppError::Validation(if message.is_empty() {
                "Request rejected by backend validation".to_string()
            } else {
                message
            }));
        }

        Err(AppError::UpstreamRejected {
            operation,
            status: status.as_u16(),
            message,
        })
    }

    /// Build an endpoint URL from path segments, percent-encoding each one
    fn endpoint(&self, segments: &[&str]) -> AppResult<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Invalid backend URL {}: {}", self.base_url, e))
        })?;

        url.path_segments_mut()
            .map_err(|_| {
                AppError::Internal(anyhow::anyhow!("Backend URL cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }
}

/// Read a JSON body, classifying unparseable bodies as upstream rejections
async fn read_json<T: DeserializeOwned>(
    operation: &'static str,
    response: reqwest::Response,
) -> AppResult<T> {
    let status = response.status().as_u16();
    let body = response.bytes().await?;

    serde_json::from_slice(&body).map_err(|e| {
        error!(operation, error = %e, body_len = body.len(), "Failed to parse backend response");
        AppError::UpstreamRejected {
            operation,
            status,
            message: String::new(),
        }
    })
}
