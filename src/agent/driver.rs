//! Run driver
//!
//! Drives one orchestrator run to a terminal state. While the run reports
//! `requires_action` the driver resolves every pending tool call through a
//! [`ToolRouter`], then submits the whole batch at once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::config::AgentConfig;
use crate::error::{CalbotError, Result};
use crate::tools::{ToolOutput, ToolRouter};

use super::client::Orchestrator;
use super::types::{RequiredToolCall, Role, Run, RunState, ThreadMessage, ToolCallRequest, ToolCallResult};

/// Polling and dispatch limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunDriverConfig {
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub tool_timeout: Duration,
}

impl Default for RunDriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: 600,
            tool_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&AgentConfig> for RunDriverConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_polls: config.max_polls,
            tool_timeout: config.tool_timeout(),
        }
    }
}

/// What a completed run left behind
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    /// Every message on the thread, oldest first
    pub messages: Vec<ThreadMessage>,
    /// Every tool call resolved over the life of the run, in submission order
    pub tool_results: Vec<ToolCallResult>,
    pub polls: u32,
}

impl RunOutcome {
    /// Tool calls whose output reports a failure
    pub fn failed_calls(&self) -> impl Iterator<Item = &ToolCallResult> {
        self.tool_results.iter().filter(|r| r.is_error())
    }

    /// Most recent message from the given role
    pub fn last_by_role(&self, role: Role) -> Option<&ThreadMessage> {
        self.messages.iter().rev().find(|m| m.role == role)
    }
}

pub struct RunDriver {
    orchestrator: Arc<dyn Orchestrator>,
    router: Arc<dyn ToolRouter>,
    tool_names: HashSet<String>,
    config: RunDriverConfig,
}

impl RunDriver {
    /// Create a driver that accepts calls to the named tools only
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        router: Arc<dyn ToolRouter>,
        tool_names: impl IntoIterator<Item = String>,
        config: RunDriverConfig,
    ) -> Self {
        Self {
            orchestrator,
            router,
            tool_names: tool_names.into_iter().collect(),
            config,
        }
    }

    /// Create a driver over whatever tools the router advertises
    pub async fn from_router(
        orchestrator: Arc<dyn Orchestrator>,
        router: Arc<dyn ToolRouter>,
        config: RunDriverConfig,
    ) -> Result<Self> {
        let names: Vec<String> = router.list_tools().await?.into_iter().map(|t| t.name).collect();
        tracing::info!(tools = ?names, "Run driver ready");
        Ok(Self::new(orchestrator, router, names, config))
    }

    pub fn advertises(&self, tool_name: &str) -> bool {
        self.tool_names.contains(tool_name)
    }

    /// Post a user message and run the agent over the thread
    pub async fn send(&self, thread_id: &str, agent_id: &str, text: &str) -> Result<RunOutcome> {
        self.orchestrator.add_message(thread_id, Role::User, text).await?;
        self.run(thread_id, agent_id).await
    }

    /// Start a run and drive it to completion
    pub async fn run(&self, thread_id: &str, agent_id: &str) -> Result<RunOutcome> {
        let run = self.orchestrator.create_run(thread_id, agent_id).await?;
        tracing::info!(thread = %thread_id, run = %run.id, "Run created");
        self.drive(thread_id, run).await
    }

    /// Poll an existing run until it settles
    pub async fn drive(&self, thread_id: &str, mut run: Run) -> Result<RunOutcome> {
        let mut polls: u32 = 0;
        let mut tool_results = Vec::new();

        loop {
            tracing::debug!(run = %run.id, status = %run.status, polls, "Run status");

            match run.status {
                RunState::Completed => {
                    let messages = self.orchestrator.list_messages(thread_id).await?;
                    tracing::info!(run = %run.id, polls, tool_calls = tool_results.len(), "Run completed");
                    return Ok(RunOutcome {
                        run_id: run.id,
                        messages,
                        tool_results,
                        polls,
                    });
                }
                RunState::RequiresAction => {
                    let outputs = self.resolve_tool_calls(thread_id, &run).await?;
                    if outputs.is_empty() {
                        tracing::warn!(run = %run.id, "Run requires action but reported no tool calls");
                    } else {
                        self.orchestrator.submit_tool_outputs(thread_id, &run.id, &outputs).await?;
                        let failed = outputs.iter().filter(|o| o.is_error()).count();
                        tracing::info!(run = %run.id, count = outputs.len(), failed, "Tool outputs submitted");
                        tool_results.extend(outputs);
                    }
                }
                state if state.is_failure() => {
                    let reason = run.failure_reason();
                    tracing::error!(run = %run.id, reason = %reason, "Run failed");
                    return Err(CalbotError::RunFailed(reason));
                }
                _ => {}
            }

            if polls >= self.config.max_polls {
                tracing::error!(run = %run.id, polls, "Run did not settle");
                return Err(CalbotError::RunTimeout(polls));
            }
            tokio::time::sleep(self.config.poll_interval).await;
            polls += 1;
            run = self.orchestrator.get_run(thread_id, &run.id).await?;
        }
    }

    /// Produce exactly one output per pending call, in the order reported
    async fn resolve_tool_calls(&self, thread_id: &str, run: &Run) -> Result<Vec<ToolCallResult>> {
        let calls = run.pending_tool_calls();

        if let Some(call) = calls.iter().find(|c| !self.advertises(&c.function.name)) {
            let name = call.function.name.clone();
            tracing::error!(run = %run.id, tool = %name, "Run requested a tool that is not advertised");
            self.cancel_quietly(thread_id, &run.id).await;
            return Err(CalbotError::UnknownTool(name));
        }

        let results = join_all(calls.iter().map(|call| self.execute(call))).await;
        match results.into_iter().collect::<Result<Vec<_>>>() {
            Ok(outputs) => Ok(outputs),
            Err(e) => {
                self.cancel_quietly(thread_id, &run.id).await;
                Err(e)
            }
        }
    }

    async fn execute(&self, call: &RequiredToolCall) -> Result<ToolCallResult> {
        let request = match ToolCallRequest::from_required(call) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(call = %call.id, tool = %call.function.name, error = %e, "Unusable tool arguments");
                return Ok(ToolCallResult::new(call.id.clone(), ToolOutput::error(e.to_string())));
            }
        };

        tracing::debug!(call = %request.call_id, tool = %request.tool_name, "Dispatching tool call");
        let dispatch = self.router.call_tool(&request.tool_name, request.arguments);
        let output = match tokio::time::timeout(self.config.tool_timeout, dispatch).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.is_handler_error() => ToolOutput::error(e.to_string()),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::warn!(call = %request.call_id, tool = %request.tool_name, "Tool call timed out");
                ToolOutput::error(format!(
                    "Tool '{}' timed out after {}s",
                    request.tool_name,
                    self.config.tool_timeout.as_secs_f64()
                ))
            }
        };

        Ok(ToolCallResult::new(request.call_id, output))
    }

    async fn cancel_quietly(&self, thread_id: &str, run_id: &str) {
        if let Err(e) = self.orchestrator.cancel_run(thread_id, run_id).await {
            tracing::warn!(run = %run_id, error = %e, "Failed to cancel run");
        }
    }
}

impl std::fmt::Debug for RunDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunDriver")
            .field("tool_names", &self.tool_names)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
