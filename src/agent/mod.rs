//! Conversational agent side: the orchestrator client and the run driver
//! that resolves tool calls on its behalf.

pub mod client;
pub mod driver;
pub mod types;

pub use client::{AgentsClient, Orchestrator};
pub use driver::{RunDriver, RunDriverConfig, RunOutcome};
pub use types::{
    Agent, AgentDefinition, Role, Run, RunState, Thread, ThreadMessage, ToolCallRequest, ToolCallResult,
};

/// Instructions given to agents registered by `calbot agent create`
pub const CALENDAR_INSTRUCTIONS: &str = "You are a calendar assistant. \
Use get_user_availability_graph to check whether a person is free between two times, \
and create_calendar_event to book a meeting on their calendar. \
Pass times as local date-times such as 2024-07-24T09:00:00 together with an IANA time zone \
name; when the user gives no zone, use Asia/Beirut. \
Report tool failures to the user plainly and do not invent availability.";
