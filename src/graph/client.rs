//! Calendar backend client
//!
//! `CalendarBackend` is the seam the calendar tools call through.
//! `GraphCalendar` implements it against the Microsoft Graph REST API,
//! acquiring a fresh token for every request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use crate::auth::{GRAPH_SCOPE, TokenSource};
use crate::config::GraphConfig;
use crate::error::{CalbotError, Result};

use super::time::{Availability, BusyInterval, TimeWindow, parse_backend_instant};
use super::types::{
    DateTimeTimeZone, EventRequest, EventResponse, ItemBody, ScheduleRequest, ScheduleResponse, backend_message,
};

/// Granularity of the free/busy view, in minutes
const AVAILABILITY_VIEW_INTERVAL: u32 = 30;

/// A new calendar event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub subject: String,
    /// HTML body content
    pub content: String,
    pub window: TimeWindow,
}

/// Identifier of a created event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEvent {
    pub event_id: String,
}

/// Calendar operations on a mailbox
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    /// Free/busy lookup over a window
    async fn get_schedule(&self, entity: &str, window: &TimeWindow) -> Result<Availability>;

    /// Create an event in the entity's calendar
    async fn create_event(&self, entity: &str, event: &NewEvent) -> Result<CreatedEvent>;
}

/// Microsoft Graph calendar client
pub struct GraphCalendar {
    client: Client,
    endpoint: Url,
    tokens: Arc<dyn TokenSource>,
}

impl GraphCalendar {
    /// Create a client for the configured endpoint
    pub fn new(config: &GraphConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| CalbotError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| CalbotError::Configuration(format!("Invalid Graph endpoint '{}': {}", config.endpoint, e)))?;

        Ok(Self {
            client,
            endpoint,
            tokens,
        })
    }

    /// `<endpoint>/users/<entity>/<path...>` with the entity as one escaped segment
    fn user_url(&self, entity: &str, path: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| CalbotError::Configuration(format!("Graph endpoint cannot take a path: {}", self.endpoint)))?
            .pop_if_empty()
            .push("users")
            .push(entity)
            .extend(path);
        Ok(url)
    }

    fn parse_schedule(body: ScheduleResponse) -> Result<Availability> {
        // An empty response reports nothing booked.
        let Some(info) = body.value.into_iter().next() else {
            return Ok(Availability::Free);
        };

        if let Some(error) = info.error {
            return Err(CalbotError::Backend {
                status: StatusCode::OK.as_u16(),
                message: error.message,
            });
        }

        let intervals = info
            .schedule_items
            .iter()
            .map(|item| {
                Ok(BusyInterval {
                    start: parse_backend_instant(&item.start.date_time, &item.start.time_zone)?,
                    end: parse_backend_instant(&item.end.date_time, &item.end.time_zone)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Availability::from_intervals(intervals))
    }
}

async fn backend_error(response: reqwest::Response) -> CalbotError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    CalbotError::Backend {
        status,
        message: backend_message(&body),
    }
}

#[async_trait]
impl CalendarBackend for GraphCalendar {
    async fn get_schedule(&self, entity: &str, window: &TimeWindow) -> Result<Availability> {
        let token = self.tokens.access_token(GRAPH_SCOPE).await?;
        let request = ScheduleRequest {
            schedules: vec![entity.to_string()],
            start_time: DateTimeTimeZone::new(window.start_wire(), window.zone_name()),
            end_time: DateTimeTimeZone::new(window.end_wire(), window.zone_name()),
            availability_view_interval: AVAILABILITY_VIEW_INTERVAL,
        };

        tracing::info!(entity = %entity, start = %request.start_time.date_time, end = %request.end_time.date_time, "Fetching schedule");

        let response = self
            .client
            .post(self.user_url(entity, &["calendar", "getSchedule"])?)
            .bearer_auth(token)
            .header("Prefer", "outlook.timezone=\"UTC\"")
            .json(&request)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            let err = backend_error(response).await;
            tracing::warn!(entity = %entity, error = %err, "Schedule lookup failed");
            return Err(err);
        }

        let body: ScheduleResponse = response.json().await?;
        Self::parse_schedule(body)
    }

    async fn create_event(&self, entity: &str, event: &NewEvent) -> Result<CreatedEvent> {
        let token = self.tokens.access_token(GRAPH_SCOPE).await?;
        let zone = event.window.zone_name();
        let request = EventRequest {
            subject: event.subject.clone(),
            body: ItemBody {
                content_type: "HTML".to_string(),
                content: event.content.clone(),
            },
            start: DateTimeTimeZone::new(event.window.start_wire(), zone),
            end: DateTimeTimeZone::new(event.window.end_wire(), zone),
        };

        tracing::info!(entity = %entity, subject = %event.subject, "Creating event");

        let response = self
            .client
            .post(self.user_url(entity, &["events"])?)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        if response.status() != StatusCode::CREATED {
            let err = backend_error(response).await;
            tracing::warn!(entity = %entity, error = %err, "Event creation failed");
            return Err(err);
        }

        let body: EventResponse = response.json().await?;
        tracing::info!(entity = %entity, event_id = %body.id, "Event created");
        Ok(CreatedEvent { event_id: body.id })
    }
}

impl std::fmt::Debug for GraphCalendar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphCalendar")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn calendar(server: &MockServer) -> GraphCalendar {
        let config = GraphConfig {
            endpoint: format!("{}/v1.0/", server.uri()),
            ..GraphConfig::default()
        };
        GraphCalendar::new(&config, Arc::new(StaticToken("tok".into()))).unwrap()
    }

    fn window() -> TimeWindow {
        TimeWindow::parse("2025-07-24T15:00:00", "2025-07-24T15:30:00", "UTC").unwrap()
    }

    #[test]
    fn test_endpoint_trimmed() {
        let config = GraphConfig {
            endpoint: "https://graph.example.com/v1.0/".into(),
            ..GraphConfig::default()
        };
        let cal = GraphCalendar::new(&config, Arc::new(StaticToken("t".into()))).unwrap();
        assert_eq!(
            cal.user_url("a@x.com", &["events"]).unwrap().as_str(),
            "https://graph.example.com/v1.0/users/a@x.com/events"
        );
    }

    #[test]
    fn test_entity_is_one_path_segment() {
        let config = GraphConfig {
            endpoint: "https://graph.example.com/v1.0".into(),
            ..GraphConfig::default()
        };
        let cal = GraphCalendar::new(&config, Arc::new(StaticToken("t".into()))).unwrap();
        let url = cal.user_url("ops/team#1?x@x.com", &["calendar", "getSchedule"]).unwrap();
        assert_eq!(url.path(), "/v1.0/users/ops%2Fteam%231%3Fx@x.com/calendar/getSchedule");
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
    }

    #[test]
    fn test_invalid_endpoint_is_configuration_error() {
        let config = GraphConfig {
            endpoint: "not a url".into(),
            ..GraphConfig::default()
        };
        let err = GraphCalendar::new(&config, Arc::new(StaticToken("t".into()))).unwrap_err();
        assert!(matches!(err, CalbotError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_get_schedule_free() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/users/a@x.com/calendar/getSchedule"))
            .and(header("authorization", "Bearer tok"))
            .and(body_partial_json(json!({
                "schedules": ["a@x.com"],
                "startTime": {"dateTime": "2025-07-24T15:00:00", "timeZone": "UTC"},
                "availabilityViewInterval": 30
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"scheduleId": "a@x.com", "scheduleItems": []}]
            })))
            .mount(&server)
            .await;

        let result = calendar(&server).get_schedule("a@x.com", &window()).await.unwrap();
        assert_eq!(result, Availability::Free);
    }

    #[tokio::test]
    async fn test_get_schedule_busy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/users/a@x.com/calendar/getSchedule"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "scheduleId": "a@x.com",
                    "scheduleItems": [{
                        "status": "busy",
                        "start": {"dateTime": "2025-07-24T15:00:00.0000000", "timeZone": "UTC"},
                        "end": {"dateTime": "2025-07-24T15:15:00.0000000", "timeZone": "UTC"}
                    }]
                }]
            })))
            .mount(&server)
            .await;

        let result = calendar(&server).get_schedule("a@x.com", &window()).await.unwrap();
        let Availability::Busy(intervals) = result else {
            panic!("expected busy");
        };
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].start, Utc.with_ymd_and_hms(2025, 7, 24, 15, 0, 0).unwrap());
        assert_eq!(intervals[0].end, Utc.with_ymd_and_hms(2025, 7, 24, 15, 15, 0).unwrap());
    }

    #[tokio::test]
    async fn test_get_schedule_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": "ErrorAccessDenied", "message": "Access is denied."}
            })))
            .mount(&server)
            .await;

        let err = calendar(&server).get_schedule("a@x.com", &window()).await.unwrap_err();
        match err {
            CalbotError::Backend { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "Access is denied.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_get_schedule_item_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "scheduleId": "ghost@x.com",
                    "error": {"message": "The mailbox could not be found.", "responseCode": "ErrorMailRecipientNotFound"}
                }]
            })))
            .mount(&server)
            .await;

        let err = calendar(&server).get_schedule("ghost@x.com", &window()).await.unwrap_err();
        assert!(err.to_string().contains("mailbox could not be found"));
    }

    #[tokio::test]
    async fn test_create_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/users/a@x.com/events"))
            .and(body_partial_json(json!({
                "subject": "Sync",
                "body": {"contentType": "HTML", "content": "Agenda"},
                "start": {"dateTime": "2025-07-24T15:00:00", "timeZone": "UTC"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "AAMkAD-1"})))
            .mount(&server)
            .await;

        let event = NewEvent {
            subject: "Sync".into(),
            content: "Agenda".into(),
            window: window(),
        };
        let created = calendar(&server).create_event("a@x.com", &event).await.unwrap();
        assert_eq!(created.event_id, "AAMkAD-1");
    }

    #[tokio::test]
    async fn test_create_event_non_created_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "unexpected"})))
            .mount(&server)
            .await;

        let event = NewEvent {
            subject: "Sync".into(),
            content: String::new(),
            window: window(),
        };
        let err = calendar(&server).create_event("a@x.com", &event).await.unwrap_err();
        assert!(matches!(err, CalbotError::Backend { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_create_event_escapes_entity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/users/room%231@x.com/events"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "evt-room"})))
            .expect(1)
            .mount(&server)
            .await;

        let event = NewEvent {
            subject: "Sync".into(),
            content: String::new(),
            window: window(),
        };
        let created = calendar(&server).create_event("room#1@x.com", &event).await.unwrap();
        assert_eq!(created.event_id, "evt-room");
    }
}
