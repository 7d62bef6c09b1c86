//! Agents orchestrator client
//!
//! `Orchestrator` is the seam the run driver polls through. `AgentsClient`
//! implements it against the agents REST API under a project endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::auth::{AGENTS_SCOPE, TokenSource};
use crate::config::AgentConfig;
use crate::error::{CalbotError, Result};

use super::types::{Agent, AgentDefinition, MessageList, Role, Run, Thread, ThreadMessage, ToolCallResult};

/// Thread and run operations the driver needs
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn create_thread(&self) -> Result<Thread>;

    async fn add_message(&self, thread_id: &str, role: Role, content: &str) -> Result<ThreadMessage>;

    async fn create_run(&self, thread_id: &str, agent_id: &str) -> Result<Run>;

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    async fn submit_tool_outputs(&self, thread_id: &str, run_id: &str, outputs: &[ToolCallResult]) -> Result<Run>;

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    /// All messages on the thread, oldest first
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;
}

/// Wire form of one submitted tool output
#[derive(Debug, Serialize)]
struct SubmittedOutput<'a> {
    tool_call_id: &'a str,
    output: String,
}

impl<'a> From<&'a ToolCallResult> for SubmittedOutput<'a> {
    fn from(result: &'a ToolCallResult) -> Self {
        Self {
            tool_call_id: &result.tool_call_id,
            output: result.output.to_submission(),
        }
    }
}

/// HTTP client for the agents API
pub struct AgentsClient {
    client: Client,
    endpoint: String,
    api_version: String,
    tokens: Arc<dyn TokenSource>,
}

impl AgentsClient {
    /// Create a client for the configured project endpoint
    pub fn new(config: &AgentConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| CalbotError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.project_endpoint.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            tokens,
        })
    }

    /// Register an agent
    pub async fn create_agent(&self, definition: &AgentDefinition) -> Result<Agent> {
        let body = serde_json::to_value(definition)?;
        self.send(Method::POST, "assistants", &[], Some(&body)).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T> {
        let token = self.tokens.access_token(AGENTS_SCOPE).await?;
        let url = format!("{}/{}", self.endpoint, path);

        let mut request = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(token)
            .query(&[("api-version", self.api_version.as_str())])
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CalbotError::Orchestrator(format!("{} {} failed: {}", method, path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("{} {} returned {}: {}", method, path, status, error_body);
            return Err(CalbotError::Orchestrator(format!(
                "{} {} returned {}: {}",
                method, path, status, error_body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CalbotError::Orchestrator(format!("Failed to parse {} response: {}", path, e)))
    }
}

#[async_trait]
impl Orchestrator for AgentsClient {
    async fn create_thread(&self) -> Result<Thread> {
        self.send(Method::POST, "threads", &[], Some(&json!({}))).await
    }

    async fn add_message(&self, thread_id: &str, role: Role, content: &str) -> Result<ThreadMessage> {
        let body = json!({ "role": role.as_str(), "content": content });
        self.send(Method::POST, &format!("threads/{}/messages", thread_id), &[], Some(&body))
            .await
    }

    async fn create_run(&self, thread_id: &str, agent_id: &str) -> Result<Run> {
        let body = json!({ "assistant_id": agent_id });
        self.send(Method::POST, &format!("threads/{}/runs", thread_id), &[], Some(&body))
            .await
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.send(Method::GET, &format!("threads/{}/runs/{}", thread_id, run_id), &[], None)
            .await
    }

    async fn submit_tool_outputs(&self, thread_id: &str, run_id: &str, outputs: &[ToolCallResult]) -> Result<Run> {
        let submitted: Vec<SubmittedOutput<'_>> = outputs.iter().map(SubmittedOutput::from).collect();
        let body = json!({ "tool_outputs": submitted });
        self.send(
            Method::POST,
            &format!("threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id),
            &[],
            Some(&body),
        )
        .await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.send(
            Method::POST,
            &format!("threads/{}/runs/{}/cancel", thread_id, run_id),
            &[],
            Some(&json!({})),
        )
        .await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let path = format!("threads/{}/messages", thread_id);
        let mut messages = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = vec![("order", "asc")];
            if let Some(cursor) = after.as_deref() {
                query.push(("after", cursor));
            }
            let page: MessageList = self.send(Method::GET, &path, &query, None).await?;
            let has_more = page.has_more && !page.data.is_empty();
            after = page.data.last().map(|m| m.id.clone());
            messages.extend(page.data);
            if !has_more {
                break;
            }
        }

        Ok(messages)
    }
}

impl std::fmt::Debug for AgentsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentsClient")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}
