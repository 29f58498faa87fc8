//! HTTP analysis backend.
//!
//! Posts the bundle and requested checks to `<url>/analyze` and decodes an
//! [`AgentResult`]; `<url>/health` answers health probes.

use crate::agent::Agent;
use crate::bundle::Bundle;
use crate::engine::AnalysisContext;
use crate::error::AgentError;
use crate::models::AgentResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for a remote agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub name: String,
    pub url: String,
    pub timeout_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            name: "remote".to_string(),
            url: "http://localhost:8080".to_string(),
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    bundle: &'a Bundle,
    checks: &'a [String],
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<String>,
}

/// An agent served over HTTP.
pub struct RemoteAgent {
    config: RemoteConfig,
    http_client: reqwest::Client,
}

impl RemoteAgent {
    pub fn new(config: RemoteConfig) -> Result<Self, AgentError> {
        info!("Initializing remote agent {} at {}", config.name, config.url);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AgentError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn send_error(&self, endpoint: &str, e: reqwest::Error) -> AgentError {
        let reason = if e.is_timeout() {
            format!("Request timed out after {}s", self.config.timeout_seconds)
        } else if e.is_connect() {
            format!("Cannot connect to {}", self.config.url)
        } else {
            format!("Failed to send request: {}", e)
        };
        AgentError::Http {
            endpoint: endpoint.to_string(),
            reason,
        }
    }

    async fn check_status(
        &self,
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, AgentError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Http {
                endpoint: endpoint.to_string(),
                reason: format!("API error {}: {}", status, body),
            });
        }
        Ok(response)
    }
}

/// Decode an `/analyze` response body.
fn parse_analyze_response(body: &str) -> Result<AgentResult, AgentError> {
    serde_json::from_str(body).map_err(|e| AgentError::Decode(e.to_string()))
}

/// Decode a `/health` response body. An empty body counts as healthy.
fn parse_health_response(body: &str) -> Result<(), AgentError> {
    if body.trim().is_empty() {
        return Ok(());
    }
    let health: HealthResponse =
        serde_json::from_str(body).map_err(|e| AgentError::Decode(e.to_string()))?;
    match health.status.to_ascii_lowercase().as_str() {
        "" | "ok" | "healthy" => Ok(()),
        other => Err(AgentError::Other(
            health
                .error
                .unwrap_or_else(|| format!("remote reported status {}", other)),
        )),
    }
}

#[async_trait]
impl Agent for RemoteAgent {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["remote".to_string()]
    }

    fn is_available(&self) -> bool {
        !self.config.url.trim().is_empty()
    }

    async fn health_check(&self, _ctx: &AnalysisContext) -> Result<(), AgentError> {
        let endpoint = self.endpoint("health");
        let response = self
            .http_client
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| self.send_error(&endpoint, e))?;
        let response = self.check_status(&endpoint, response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::Decode(e.to_string()))?;
        parse_health_response(&body)
    }

    async fn analyze(
        &self,
        _ctx: &AnalysisContext,
        bundle: Arc<Bundle>,
        checks: &[String],
    ) -> Result<AgentResult, AgentError> {
        let endpoint = self.endpoint("analyze");
        debug!(endpoint = %endpoint, files = bundle.len(), "sending bundle");

        let request = AnalyzeRequest {
            bundle: &bundle,
            checks,
        };
        let response = self
            .http_client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.send_error(&endpoint, e))?;
        let response = self.check_status(&endpoint, response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::Decode(e.to_string()))?;

        let result = parse_analyze_response(&body)?;
        info!(
            agent = %self.config.name,
            verdicts = result.verdicts.len(),
            "remote analysis finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VerdictKind;

    #[test]
    fn test_parse_analyze_response() {
        let body = r#"{
            "verdicts": [
                {"kind": "fail", "title": "Disk", "message": "full", "confidence": 0.9}
            ],
            "errors": [{"check": "cpu", "error": "missing", "dataError": true}],
            "durationMs": 12
        }"#;
        let result = parse_analyze_response(body).unwrap();
        assert_eq!(result.verdicts[0].kind, VerdictKind::Fail);
        assert_eq!(result.verdicts[0].confidence, Some(0.9));
        assert!(result.errors[0].data_error);
        assert_eq!(result.duration_ms, 12);

        assert!(matches!(
            parse_analyze_response("<html>"),
            Err(AgentError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_health_response() {
        assert!(parse_health_response("").is_ok());
        assert!(parse_health_response(r#"{"status": "OK"}"#).is_ok());
        let err = parse_health_response(r#"{"status": "down", "error": "db offline"}"#).unwrap_err();
        assert_eq!(err.to_string(), "db offline");
    }

    #[test]
    fn test_endpoint_and_availability() {
        let agent = RemoteAgent::new(RemoteConfig {
            url: "http://analyzer:9000/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(agent.endpoint("analyze"), "http://analyzer:9000/analyze");
        assert!(agent.is_available());

        let offline = RemoteAgent::new(RemoteConfig {
            url: String::new(),
            ..Default::default()
        })
        .unwrap();
        assert!(!offline.is_available());
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_http_error() {
        let agent = RemoteAgent::new(RemoteConfig {
            url: "http://127.0.0.1:1".to_string(),
            timeout_seconds: 2,
            ..Default::default()
        })
        .unwrap();
        let err = agent
            .health_check(&AnalysisContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Http { .. }));
    }
}
