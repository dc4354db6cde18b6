//! HTTP implementation of [`Backend`] using reqwest.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use serde::Serialize;
use tracing::debug;

use super::framing::{decode_frames, LineDecoder, SseDecoder};
use super::{
    ApiError, ApiResult, Backend, ChatRequest, CrawlRequest, EnqueueResponse, FrameStream,
    ShadowIndexRequest, ShadowStatus,
};
use crate::config::{BackendConfig, Endpoints};

const EVENT_STREAM: &str = "text/event-stream";

/// Backend reached over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    endpoints: Endpoints,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            endpoints: config.endpoints.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> ApiResult<reqwest::Response> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        check_status(response).await
    }

    async fn get_with_job(&self, path: &str, job_id: &str) -> ApiResult<reqwest::Response> {
        let response = self
            .client
            .get(self.url(path))
            .query(&[("job_id", job_id)])
            .send()
            .await?;
        check_status(response).await
    }

    async fn enqueue(&self, path: &str, body: &impl Serialize) -> ApiResult<Option<String>> {
        let response = self.post_json(path, body).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let parsed: EnqueueResponse = serde_json::from_str(&text)?;
        Ok(parsed.into_job_id())
    }
}

/// Turn non-success responses into [`ApiError`]s.
async fn check_status(response: reqwest::Response) -> ApiResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::from_status(status.as_u16(), &body))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn enqueue_crawl(&self, request: &CrawlRequest) -> ApiResult<Option<String>> {
        self.enqueue(&self.endpoints.crawl, request).await
    }

    async fn progress_stream(&self, job_id: &str) -> ApiResult<FrameStream> {
        let response = self
            .client
            .get(self.url(&self.endpoints.progress_stream))
            .query(&[("job_id", job_id)])
            .header(ACCEPT, HeaderValue::from_static(EVENT_STREAM))
            .send()
            .await?;
        let response = check_status(response).await?;
        debug!(job_id, "Progress stream opened");
        Ok(decode_frames(
            Box::pin(response.bytes_stream()),
            SseDecoder::default(),
        ))
    }

    async fn crawl_status(&self, job_id: &str) -> ApiResult<serde_json::Value> {
        let response = self
            .get_with_job(&self.endpoints.crawl_status, job_id)
            .await?;
        Ok(response.json().await?)
    }

    async fn record_visit(&self, url: &str) -> ApiResult<()> {
        self.post_json(&self.endpoints.visits, &serde_json::json!({ "url": url }))
            .await?;
        Ok(())
    }

    async fn queue_shadow_index(
        &self,
        request: &ShadowIndexRequest,
    ) -> ApiResult<Option<String>> {
        self.enqueue(&self.endpoints.shadow_queue, request).await
    }

    async fn shadow_status(&self, job_id: &str) -> ApiResult<ShadowStatus> {
        let response = self
            .get_with_job(&self.endpoints.shadow_status, job_id)
            .await?;
        Ok(response.json().await?)
    }

    async fn stream_chat(&self, request: &ChatRequest) -> ApiResult<FrameStream> {
        let response = self
            .client
            .post(self.url(&self.endpoints.chat_stream))
            .header(ACCEPT, HeaderValue::from_static(EVENT_STREAM))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(decode_frames(
            Box::pin(response.bytes_stream()),
            SseDecoder::default(),
        ))
    }

    async fn request_chat(&self, request: &ChatRequest) -> ApiResult<FrameStream> {
        let response = self.post_json(&self.endpoints.chat, request).await?;
        Ok(decode_frames(
            Box::pin(response.bytes_stream()),
            LineDecoder::default(),
        ))
    }
}
