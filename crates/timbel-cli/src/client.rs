use crate::config::CliConfig;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use timbel_core::logs::LogEntry;
use timbel_core::pipeline::Pipeline;
use timbel_core::query::Page;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Server error ({status}): {message}")]
    Server { status: StatusCode, message: String },
}

/// Response envelope shared by every API endpoint.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    message: String,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &CliConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/v1{}", self.base_url, path);
        let req = self.client.request(method, &url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;

        if status.is_success() {
            let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|e| {
                ClientError::Server {
                    status,
                    message: format!("unreadable response: {}", e),
                }
            })?;
            return envelope.data.ok_or_else(|| ClientError::Server {
                status,
                message: "response carried no data".to_string(),
            });
        }

        let message = serde_json::from_str::<Envelope<Value>>(&text)
            .map(|e| e.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| status.to_string());

        Err(match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(message),
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized(message),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT => ClientError::Rejected(message),
            _ => ClientError::Server { status, message },
        })
    }

    pub async fn get_pipeline(&self, id: &str) -> Result<Pipeline, ClientError> {
        self.send(self.request(Method::GET, &format!("/pipelines/{}/status", id)))
            .await
    }

    pub async fn active_pipelines(&self) -> Result<Vec<Pipeline>, ClientError> {
        self.send(self.request(Method::GET, "/pipelines/active"))
            .await
    }

    pub async fn cancel_pipeline(&self, id: &str, reason: Option<&str>) -> Result<Value, ClientError> {
        let req = self
            .request(Method::POST, &format!("/pipelines/{}/cancel", id))
            .json(&json!({ "reason": reason }));
        self.send(req).await
    }

    pub async fn restart_pipeline(
        &self,
        id: &str,
        from_stage: Option<&str>,
    ) -> Result<Value, ClientError> {
        let req = self
            .request(Method::POST, &format!("/pipelines/{}/restart", id))
            .json(&json!({ "fromStage": from_stage }));
        self.send(req).await
    }

    pub async fn logs(
        &self,
        id: &str,
        stage: Option<&str>,
        after: Option<u64>,
    ) -> Result<Vec<LogEntry>, ClientError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(stage) = stage {
            query.push(("stageId", stage.to_string()));
        }
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        let req = self
            .request(Method::GET, &format!("/pipelines/{}/logs", id))
            .query(&query);
        self.send(req).await
    }

    pub async fn history(
        &self,
        query: &[(&'static str, String)],
    ) -> Result<Page<Pipeline>, ClientError> {
        self.send(self.request(Method::GET, "/history").query(query))
            .await
    }
}
