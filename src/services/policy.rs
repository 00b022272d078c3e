//! Policy engine gate
//!
//! Authorization rules are evaluated by an external engine; the core only
//! ships the decision request and honors the verdict. Deny responses are
//! surfaced to clients without the engine's rationale.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::PolicyConfig;
use crate::services::agents::PipelineError;

pub const WAREHOUSE_QUERY_RESOURCE: &str = "warehouse_query";

#[derive(Debug, Clone, Serialize)]
pub struct PolicyRequest<'a> {
    pub user_id: &'a str,
    pub roles: &'a BTreeSet<String>,
    pub tenant_id: &'a str,
    pub resource: &'static str,
    pub sql: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny,
}

#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn evaluate(&self, request: &PolicyRequest<'_>) -> Result<PolicyDecision, PipelineError>;

    fn mode(&self) -> &'static str;
}

// ============================================================================
// HTTP engine client
// ============================================================================

/// Client for an OPA-style HTTP policy endpoint. The request body wraps the
/// decision input under `input`; both `{"result": {"allow": bool}}` and a
/// bare `{"allow": bool}` response are accepted.
pub struct HttpPolicyEngine {
    http_client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct PolicyResponse {
    #[serde(default)]
    result: Option<AllowVerdict>,
    #[serde(default)]
    allow: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct AllowVerdict {
    #[serde(default)]
    allow: bool,
}

impl HttpPolicyEngine {
    pub fn new(endpoint: String, timeout_ms: u64) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("Failed to create policy HTTP client");
        Self { http_client, endpoint }
    }
}

#[async_trait]
impl PolicyEngine for HttpPolicyEngine {
    async fn evaluate(&self, request: &PolicyRequest<'_>) -> Result<PolicyDecision, PipelineError> {
        let body = json!({ "input": request });

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Policy engine call failed: {}", e);
                PipelineError::Internal(format!("policy engine unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!("Policy engine returned {}", status);
            return Err(PipelineError::Internal(format!("policy engine returned {}", status)));
        }

        let verdict: PolicyResponse = response.json().await.map_err(|e| {
            tracing::error!("Policy engine response malformed: {}", e);
            PipelineError::Internal(format!("policy engine response malformed: {}", e))
        })?;

        let allow = verdict
            .result
            .map(|r| r.allow)
            .or(verdict.allow)
            .unwrap_or(false);

        Ok(if allow { PolicyDecision::Allow } else { PolicyDecision::Deny })
    }

    fn mode(&self) -> &'static str {
        "http"
    }
}

// ============================================================================
// Static engine
// ============================================================================

/// Fixed-verdict engine for deployments without an external engine and for
/// tests.
pub struct StaticPolicyEngine {
    allow: bool,
}

impl StaticPolicyEngine {
    pub fn new(allow: bool) -> Self {
        Self { allow }
    }
}

#[async_trait]
impl PolicyEngine for StaticPolicyEngine {
    async fn evaluate(&self, request: &PolicyRequest<'_>) -> Result<PolicyDecision, PipelineError> {
        tracing::debug!(
            "Static policy {} for user {} on {}",
            if self.allow { "allow" } else { "deny" },
            request.user_id,
            request.resource
        );
        Ok(if self.allow { PolicyDecision::Allow } else { PolicyDecision::Deny })
    }

    fn mode(&self) -> &'static str {
        "static"
    }
}

pub fn from_config(cfg: &PolicyConfig) -> std::sync::Arc<dyn PolicyEngine> {
    match cfg.mode.as_str() {
        "http" => {
            let endpoint = cfg
                .endpoint
                .clone()
                .expect("validated config guarantees an endpoint in http mode");
            std::sync::Arc::new(HttpPolicyEngine::new(endpoint, cfg.timeout_ms))
        },
        "deny" => std::sync::Arc::new(StaticPolicyEngine::new(false)),
        _ => std::sync::Arc::new(StaticPolicyEngine::new(true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(roles: &'a BTreeSet<String>) -> PolicyRequest<'a> {
        PolicyRequest {
            user_id: "u-1",
            roles,
            tenant_id: "t-1",
            resource: WAREHOUSE_QUERY_RESOURCE,
            sql: "SELECT 1",
        }
    }

    #[tokio::test]
    async fn static_engine_returns_its_verdict() {
        let roles = BTreeSet::from(["analyst".to_string()]);
        let allow = StaticPolicyEngine::new(true);
        let deny = StaticPolicyEngine::new(false);
        assert_eq!(allow.evaluate(&request(&roles)).await.unwrap(), PolicyDecision::Allow);
        assert_eq!(deny.evaluate(&request(&roles)).await.unwrap(), PolicyDecision::Deny);
    }

    #[test]
    fn accepts_both_opa_and_flat_response_shapes() {
        let opa: PolicyResponse = serde_json::from_str(r#"{"result": {"allow": true}}"#).unwrap();
        assert_eq!(opa.result.map(|r| r.allow), Some(true));

        let flat: PolicyResponse = serde_json::from_str(r#"{"allow": false}"#).unwrap();
        assert_eq!(flat.allow, Some(false));

        let empty: PolicyResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.result.is_none() && empty.allow.is_none());
    }
}
