use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures_util::StreamExt;
use ledger_logging::{ledger_debug, ledger_warn};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::types::SyncStarted;
use crate::{
    AgentReply, AgentRequest, ApiResponse, ClientError, FailureKind, OperationStatus, QueryChunk,
    QuerySummary,
};

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    /// Sent as `Authorization: Bearer <key>` when set.
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    /// Per-request ceiling; streaming queries are bounded by cancellation instead.
    pub request_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_key: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Receives rows as a streaming query produces them.
pub trait RowSink: Send + Sync {
    fn emit(&self, rows: Vec<Value>);
}

#[async_trait::async_trait]
pub trait StatusClient: Send + Sync {
    async fn operation_status(
        &self,
        task_id: &str,
    ) -> Result<ApiResponse<OperationStatus>, ClientError>;
}

#[async_trait::async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Streams rows into `sink` until the backend completes the query or
    /// `cancel` fires.
    async fn stream_query(
        &self,
        graph_id: &str,
        query: &str,
        sink: &dyn RowSink,
        cancel: &CancellationToken,
    ) -> Result<QuerySummary, ClientError>;
}

#[async_trait::async_trait]
pub trait AgentClient: Send + Sync {
    async fn ask_agent(
        &self,
        graph_id: &str,
        request: &AgentRequest,
    ) -> Result<AgentReply, ClientError>;
}

#[async_trait::async_trait]
pub trait ConnectionClient: Send + Sync {
    /// Starts a sync and returns the operation id to track.
    async fn sync_connection(&self, connection_id: &str) -> Result<String, ClientError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestApiClient {
    settings: ClientSettings,
    base: Url,
    client: reqwest::Client,
    streaming: reqwest::Client,
}

impl ReqwestApiClient {
    pub fn new(settings: ClientSettings) -> Result<Self, ClientError> {
        let base = Url::parse(&settings.base_url)
            .map_err(|err| ClientError::new(FailureKind::InvalidUrl, err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::new(
                FailureKind::InvalidUrl,
                format!("{} cannot be used as a base url", settings.base_url),
            ));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ClientError::new(FailureKind::Network, err.to_string()))?;
        let streaming = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| ClientError::new(FailureKind::Network, err.to_string()))?;

        Ok(Self {
            settings,
            base,
            client,
            streaming,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::new(FailureKind::InvalidUrl, "base url has no path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.api_key {
            Some(key) => request.header(AUTHORIZATION, format!("Bearer {key}")),
            None => request,
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<ApiResponse<T>, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::new(
                FailureKind::HttpStatus(status.as_u16()),
                error_detail(&body).unwrap_or_else(|| status.to_string()),
            ));
        }
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(ApiResponse::from_body(&body))
    }
}

#[async_trait::async_trait]
impl StatusClient for ReqwestApiClient {
    async fn operation_status(
        &self,
        task_id: &str,
    ) -> Result<ApiResponse<OperationStatus>, ClientError> {
        let url = self.endpoint(&["operations", task_id])?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::read_json(response).await
    }
}

#[async_trait::async_trait]
impl QueryExecutor for ReqwestApiClient {
    async fn stream_query(
        &self,
        graph_id: &str,
        query: &str,
        sink: &dyn RowSink,
        cancel: &CancellationToken,
    ) -> Result<QuerySummary, ClientError> {
        let url = self.endpoint(&["v1", "graphs", graph_id, "query"])?;
        let request = self
            .authorize(self.streaming.post(url))
            .header(ACCEPT, "application/x-ndjson")
            .json(&serde_json::json!({ "query": query }));

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::cancelled()),
            response = request.send() => response.map_err(map_reqwest_error)?,
        };
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::new(
                FailureKind::HttpStatus(status.as_u16()),
                error_detail(&body).unwrap_or_else(|| status.to_string()),
            ));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = BytesMut::new();
        let mut decoder = ChunkDecoder::default();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::cancelled()),
                next = stream.next() => next,
            };
            match next {
                Some(chunk) => {
                    let chunk = chunk.map_err(map_reqwest_error)?;
                    buffer.extend_from_slice(&chunk);
                    while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                        let line = buffer.split_to(newline + 1);
                        decoder.feed(&line[..newline], sink)?;
                    }
                }
                None => {
                    if buffer.has_remaining() {
                        let rest = buffer.split();
                        decoder.feed(&rest, sink)?;
                    }
                    break;
                }
            }
        }
        Ok(decoder.finish())
    }
}

#[async_trait::async_trait]
impl AgentClient for ReqwestApiClient {
    async fn ask_agent(
        &self,
        graph_id: &str,
        request: &AgentRequest,
    ) -> Result<AgentReply, ClientError> {
        let url = self.endpoint(&["v1", "graphs", graph_id, "agent"])?;
        let response = self
            .authorize(self.client.post(url))
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let reply: Value = Self::read_json(response).await?.into_result()?;
        if let Some(error) = reply.get("error").and_then(Value::as_str) {
            return Err(ClientError::new(FailureKind::Remote, error));
        }
        serde_json::from_value(reply)
            .map_err(|err| ClientError::new(FailureKind::Malformed, err.to_string()))
    }
}

#[async_trait::async_trait]
impl ConnectionClient for ReqwestApiClient {
    async fn sync_connection(&self, connection_id: &str) -> Result<String, ClientError> {
        let url = self.endpoint(&["v1", "connections", connection_id, "sync"])?;
        let response = self
            .authorize(self.client.post(url))
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let started: SyncStarted = Self::read_json(response).await?.into_result()?;
        Ok(started.operation_id)
    }
}

/// Turns NDJSON lines into rows and a final summary.
#[derive(Debug, Default)]
struct ChunkDecoder {
    rows_seen: usize,
    reported: Option<usize>,
}

impl ChunkDecoder {
    fn feed(&mut self, line: &[u8], sink: &dyn RowSink) -> Result<(), ClientError> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Ok(());
        }
        let chunk: QueryChunk = serde_json::from_slice(line).map_err(|err| {
            ledger_warn!("Malformed query stream line: {}", err);
            ClientError::new(FailureKind::Malformed, err.to_string())
        })?;
        match chunk {
            QueryChunk::Rows { rows } => {
                ledger_debug!("Query stream delivered {} rows", rows.len());
                self.rows_seen += rows.len();
                sink.emit(rows);
                Ok(())
            }
            QueryChunk::Complete { row_count } => {
                self.reported = row_count;
                Ok(())
            }
            QueryChunk::Error { message } => Err(ClientError::new(FailureKind::Remote, message)),
        }
    }

    fn finish(self) -> QuerySummary {
        QuerySummary {
            row_count: self.reported.unwrap_or(self.rows_seen),
        }
    }
}

fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["detail", "error", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(ToOwned::to_owned)
}

fn map_reqwest_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        return ClientError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_builder() {
        return ClientError::new(FailureKind::InvalidUrl, err.to_string());
    }
    ClientError::new(FailureKind::Network, err.to_string())
}
