//! Calendar tools
//!
//! The two tools the agent can call: an availability check and event
//! creation. Both translate bound arguments into `CalendarBackend` calls and
//! backend answers into `ToolOutput`s.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::error::{CalbotError, Result};
use crate::graph::{Availability, CalendarBackend, NewEvent, TimeWindow};

use super::definition::{ParamSpec, ParamType, ToolDefinition, ToolHandler, ToolOutput};
use super::registry::ToolRegistry;

pub const AVAILABILITY_TOOL: &str = "get_user_availability_graph";
pub const CREATE_EVENT_TOOL: &str = "create_calendar_event";

/// Fetch a string argument that binding has already checked
fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CalbotError::InvalidArguments(format!("missing required field: {}", key)))
}

/// Free/busy lookup for one mailbox
pub struct AvailabilityTool {
    backend: Arc<dyn CalendarBackend>,
}

impl AvailabilityTool {
    pub fn new(backend: Arc<dyn CalendarBackend>) -> Self {
        Self { backend }
    }

    pub fn definition(self, default_zone: &str) -> ToolDefinition {
        ToolDefinition::new(
            AVAILABILITY_TOOL,
            "Check whether a user is free or busy during a time window using their calendar.",
            Arc::new(self),
        )
        .with_param(ParamSpec::required(
            "user_email",
            ParamType::String,
            "The email address of the user whose availability you want to check.",
        ))
        .with_param(ParamSpec::required(
            "start_time",
            ParamType::String,
            "Start of the availability window in ISO 8601 format, e.g. 2025-07-22T10:00:00",
        ))
        .with_param(ParamSpec::required(
            "end_time",
            ParamType::String,
            "End of the availability window in ISO 8601 format, e.g. 2025-07-22T12:00:00",
        ))
        .with_param(
            ParamSpec::optional("time_zone", ParamType::String, "Time zone of the dates, e.g. Asia/Beirut")
                .with_default(json!(default_zone)),
        )
    }
}

#[async_trait]
impl ToolHandler for AvailabilityTool {
    async fn call(&self, args: &Map<String, Value>) -> Result<ToolOutput> {
        let email = str_arg(args, "user_email")?;
        let window = TimeWindow::parse(
            str_arg(args, "start_time")?,
            str_arg(args, "end_time")?,
            str_arg(args, "time_zone")?,
        )?;
        let zone = window.zone_name();

        let availability = match self.backend.get_schedule(email, &window).await {
            Ok(availability) => availability,
            Err(CalbotError::Backend { status, message }) => {
                return Ok(ToolOutput::error(format!("Failed to retrieve schedule: {} - {}", status, message))
                    .with_structured(json!({"status": status, "success": false})));
            }
            Err(e) => return Err(e),
        };

        let text = match availability {
            Availability::Free => format!(
                "{} is available between {} and {} ({}).",
                email,
                window.start_wire(),
                window.end_wire(),
                zone
            ),
            Availability::Busy(intervals) => {
                let slots: Vec<String> = intervals.iter().map(|i| i.display(window.zone)).collect();
                format!(
                    "{} is busy during these times (all shown in {} timezone):\n{}",
                    email,
                    zone,
                    slots.join("\n")
                )
            }
        };
        log::info!("{}", text);
        Ok(ToolOutput::success(text))
    }
}

/// Event creation in one mailbox
pub struct CreateEventTool {
    backend: Arc<dyn CalendarBackend>,
}

impl CreateEventTool {
    pub fn new(backend: Arc<dyn CalendarBackend>) -> Self {
        Self { backend }
    }

    pub fn definition(self, default_zone: &str) -> ToolDefinition {
        ToolDefinition::new(
            CREATE_EVENT_TOOL,
            "Create a calendar event for a user.",
            Arc::new(self),
        )
        .with_param(ParamSpec::required(
            "user_email",
            ParamType::String,
            "The email of the user to create the event for.",
        ))
        .with_param(ParamSpec::required("subject", ParamType::String, "The subject of the event."))
        .with_param(
            ParamSpec::optional("content", ParamType::String, "The content/body of the event.").with_default(json!("")),
        )
        .with_param(ParamSpec::required(
            "start_time",
            ParamType::String,
            "Start datetime in ISO format, e.g. 2025-07-25T13:00:00",
        ))
        .with_param(ParamSpec::required(
            "end_time",
            ParamType::String,
            "End datetime in ISO format, e.g. 2025-07-25T14:00:00",
        ))
        .with_param(
            ParamSpec::optional("time_zone", ParamType::String, "Time zone for the event (e.g. Asia/Beirut)")
                .with_default(json!(default_zone)),
        )
    }
}

#[async_trait]
impl ToolHandler for CreateEventTool {
    async fn call(&self, args: &Map<String, Value>) -> Result<ToolOutput> {
        let email = str_arg(args, "user_email")?;
        let subject = str_arg(args, "subject")?;
        let event = NewEvent {
            subject: subject.to_string(),
            content: str_arg(args, "content").unwrap_or_default().to_string(),
            window: TimeWindow::parse(
                str_arg(args, "start_time")?,
                str_arg(args, "end_time")?,
                str_arg(args, "time_zone")?,
            )?,
        };

        match self.backend.create_event(email, &event).await {
            Ok(created) => Ok(ToolOutput::success(format!(
                "Event '{}' created successfully for {} (event_id={}).",
                subject, email, created.event_id
            ))
            .with_structured(json!({"event_id": created.event_id, "success": true}))),
            Err(CalbotError::Backend { status, message }) => {
                Ok(ToolOutput::error(format!("Failed to create event: {} - {}", status, message))
                    .with_structured(json!({"status": status, "success": false})))
            }
            Err(e) => Err(e),
        }
    }
}

/// Build the registry holding both calendar tools
pub fn calendar_registry(backend: Arc<dyn CalendarBackend>, default_zone: &str) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(AvailabilityTool::new(backend.clone()).definition(default_zone))?;
    registry.register(CreateEventTool::new(backend).definition(default_zone))?;
    Ok(registry)
}
