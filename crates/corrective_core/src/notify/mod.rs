use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// Failures crossing the notifier boundary. Never propagated into engine
/// results; the engine logs and swallows them (fire-and-forget).
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("notifier unavailable: {0}")]
    Unavailable(String),
    #[error("notifier rejected payload: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DowntimeStarted {
    pub asset_id: i64,
    pub asset_name: Option<String>,
    pub sector_id: Option<i64>,
    pub failure_id: Option<i64>,
    pub failure_title: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub cause: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DowntimeEnded {
    pub asset_id: i64,
    pub asset_name: Option<String>,
    pub sector_id: Option<i64>,
    pub failure_id: Option<i64>,
    pub failure_title: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub ended_at: OffsetDateTime,
    pub duration_minutes: i64,
    pub cause: Option<String>,
}

/// Outbound alerting on downtime start/end.
///
/// Implementations own their delivery, queueing and retry policy; the engine
/// only hands the event off once per state transition.
pub trait DowntimeNotifier {
    fn notify_downtime_start(&self, event: &DowntimeStarted) -> Result<(), NotifierError>;
    fn notify_downtime_end(&self, event: &DowntimeEnded) -> Result<(), NotifierError>;
}

/// Notifier that drops every event, for deployments without alerting.
pub struct NoopNotifier;

impl DowntimeNotifier for NoopNotifier {
    fn notify_downtime_start(&self, _event: &DowntimeStarted) -> Result<(), NotifierError> {
        Ok(())
    }

    fn notify_downtime_end(&self, _event: &DowntimeEnded) -> Result<(), NotifierError> {
        Ok(())
    }
}
