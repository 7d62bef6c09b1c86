//! Calendar backend adapter
//!
//! Schedule lookup and event creation against Microsoft Graph, plus the time
//! zone handling around them.

pub mod client;
pub mod time;
pub mod types;

pub use client::{CalendarBackend, CreatedEvent, GraphCalendar, NewEvent};
pub use time::{Availability, BusyInterval, TimeWindow};
