/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Downstream transformation and business-rule step interfaces.
//!
//! The transformation and rule engines are external collaborators invoked
//! over HTTP RPC with short per-call timeouts nested inside the
//! coordinator's deadline. They are stateless from this engine's point of
//! view: no concurrency or consistency logic lives behind these traits.
//!
//! Deployments without the collaborators compose the no-op implementations
//! instead; business logic never null-checks a collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::StepError;

/// A conclusive decision produced by the rules engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Decision {
    Approved {
        /// Authorization reference assigned by the deciding system.
        #[serde(skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    Denied {
        reason: String,
    },
}

/// One field-level validation error surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Result of a rules evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A final decision is reachable right now.
    Conclusive(Decision),
    /// More processing is required; the request must pend.
    Inconclusive,
    /// The payload itself is invalid; a caller error, never retried.
    ValidationFailed(Vec<FieldError>),
}

/// Transformation step: converts the submitted payload into the downstream
/// target format.
#[async_trait]
pub trait TransformStep: Send + Sync {
    async fn transform(
        &self,
        tenant: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, StepError>;
}

/// Business-rule step: evaluates a transformed payload for a decision.
#[async_trait]
pub trait RuleStep: Send + Sync {
    async fn evaluate(
        &self,
        tenant: &str,
        transformed: &serde_json::Value,
    ) -> Result<StepOutcome, StepError>;
}

/// Identity transformation for deployments without a converter service.
pub struct NoopTransformStep;

#[async_trait]
impl TransformStep for NoopTransformStep {
    async fn transform(
        &self,
        _tenant: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, StepError> {
        Ok(payload.clone())
    }
}

/// Rules stand-in that never reaches a decision, so every request pends.
/// The safe default for deployments without a rules engine.
pub struct NoopRuleStep;

#[async_trait]
impl RuleStep for NoopRuleStep {
    async fn evaluate(
        &self,
        _tenant: &str,
        _transformed: &serde_json::Value,
    ) -> Result<StepOutcome, StepError> {
        Ok(StepOutcome::Inconclusive)
    }
}

/// Wire form of a rules engine response.
#[derive(Debug, Deserialize)]
struct RuleResponse {
    outcome: String,
    #[serde(default)]
    decision: Option<Decision>,
    #[serde(default)]
    errors: Vec<FieldError>,
}

/// Transformation step over HTTP RPC.
pub struct HttpTransformStep {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransformStep {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, StepError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StepError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl TransformStep for HttpTransformStep {
    async fn transform(
        &self,
        tenant: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, StepError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Tenant", tenant)
            .json(payload)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(StepError::Transport(format!(
                "transform endpoint returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| StepError::MalformedResponse(e.to_string()))
    }
}

/// Business-rule step over HTTP RPC.
pub struct HttpRuleStep {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRuleStep {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, StepError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StepError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl RuleStep for HttpRuleStep {
    async fn evaluate(
        &self,
        tenant: &str,
        transformed: &serde_json::Value,
    ) -> Result<StepOutcome, StepError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Tenant", tenant)
            .json(transformed)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(StepError::Transport(format!(
                "rules endpoint returned {}",
                response.status()
            )));
        }

        let body: RuleResponse = response
            .json()
            .await
            .map_err(|e| StepError::MalformedResponse(e.to_string()))?;

        match body.outcome.as_str() {
            "conclusive" => match body.decision {
                Some(decision) => Ok(StepOutcome::Conclusive(decision)),
                None => Err(StepError::MalformedResponse(
                    "conclusive outcome without a decision".to_string(),
                )),
            },
            "inconclusive" => Ok(StepOutcome::Inconclusive),
            "validation-failed" => Ok(StepOutcome::ValidationFailed(body.errors)),
            other => Err(StepError::MalformedResponse(format!(
                "unknown outcome '{}'",
                other
            ))),
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> StepError {
    if e.is_timeout() {
        StepError::Timeout
    } else {
        StepError::Transport(e.to_string())
    }
}
