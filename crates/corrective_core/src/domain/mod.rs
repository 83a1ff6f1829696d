use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::EngineError;

/// Declares a closed enumeration stored as TEXT in the record store.
///
/// The wire strings are the canonical values of the surrounding platform;
/// anything else read back from the store is a validation failure, never a
/// silently-invented default.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Result<Self, EngineError> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(EngineError::validation(format!(
                        concat!("invalid ", stringify!($name), " value: {}"),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                $name::parse(s).map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_enum!(
    /// Lifecycle of a reported failure. `ResolvedImmediate` covers failures
    /// fixed on the spot, before a work order was ever scheduled.
    FailureStatus {
        Open => "OPEN",
        InProgress => "IN_PROGRESS",
        Reported => "REPORTED",
        Resolved => "RESOLVED",
        ResolvedImmediate => "RESOLVED_IMMEDIATE",
    }
);

impl FailureStatus {
    /// Statuses eligible as duplicate candidates (still unresolved).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            FailureStatus::Open | FailureStatus::InProgress | FailureStatus::Reported
        )
    }

    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            FailureStatus::Resolved | FailureStatus::ResolvedImmediate
        )
    }
}

text_enum!(
    /// Ordered so that P1 sorts first.
    Priority {
        P1 => "P1",
        P2 => "P2",
        P3 => "P3",
        P4 => "P4",
    }
);

text_enum!(
    AssetCriticality {
        Critical => "CRITICAL",
        High => "HIGH",
        Medium => "MEDIUM",
        Low => "LOW",
    }
);

text_enum!(
    DowntimeCategory {
        Unplanned => "UNPLANNED",
        Planned => "PLANNED",
        External => "EXTERNAL",
    }
);

text_enum!(
    QaStatus {
        NotRequired => "NOT_REQUIRED",
        Pending => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
    }
);

text_enum!(
    QaReason {
        Safety => "SAFETY",
        HighPriority => "HIGH_PRIORITY",
        HighCriticality => "HIGH_CRITICALITY",
        HighDowntime => "HIGH_DOWNTIME",
        Recurrence => "RECURRENCE",
    }
);

text_enum!(
    /// Escalating documentation requirements; ordered weakest to strongest.
    EvidenceLevel {
        Optional => "OPTIONAL",
        Basic => "BASIC",
        Standard => "STANDARD",
        Complete => "COMPLETE",
    }
);

text_enum!(
    /// Outcome labels are the platform's canonical Spanish values.
    SolutionOutcome {
        Funciono => "FUNCIONÓ",
        Parcial => "PARCIAL",
        NoFunciono => "NO_FUNCIONÓ",
    }
);

pub const LIST_FORMAT_VERSION: u32 = 1;

/// Versioned list payload stored as JSON TEXT.
///
/// Symptom/attachment/tool/part lists were opaque blobs in the reference
/// behavior; here decode is explicit and an unknown version is rejected
/// instead of guessed at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionedList<T> {
    pub version: u32,
    pub items: Vec<T>,
}

impl<T> VersionedList<T> {
    pub fn new(items: Vec<T>) -> Self {
        VersionedList {
            version: LIST_FORMAT_VERSION,
            items,
        }
    }

    pub fn empty() -> Self {
        VersionedList::new(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for VersionedList<T> {
    fn default() -> Self {
        VersionedList::empty()
    }
}

impl<T: Serialize + DeserializeOwned> VersionedList<T> {
    pub fn encode(&self) -> Result<String, EngineError> {
        serde_json::to_string(self).map_err(|e| EngineError::store("encode list payload", e))
    }

    pub fn decode(raw: &str) -> Result<Self, EngineError> {
        let list: VersionedList<T> = serde_json::from_str(raw)
            .map_err(|e| EngineError::validation(format!("malformed list payload: {e}")))?;
        if list.version != LIST_FORMAT_VERSION {
            return Err(EngineError::validation(format!(
                "unsupported list payload version {}",
                list.version
            )));
        }
        Ok(list)
    }
}

pub type SymptomList = VersionedList<i64>;
pub type AttachmentList = VersionedList<String>;
pub type ToolUsageList = VersionedList<ToolUsage>;
pub type SparePartUsageList = VersionedList<SparePartUsage>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolUsage {
    pub name: String,
    pub quantity: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SparePartUsage {
    pub name: String,
    pub part_number: Option<String>,
    pub quantity: Option<i64>,
}

/// An asset failure report.
///
/// Invariant: a record with `is_linked_duplicate = true` references an
/// existing non-duplicate occurrence and is excluded as a *candidate* from
/// every similarity search (it may still be a query). Records are never
/// hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureOccurrence {
    pub id: i64,
    pub tenant_id: i64,
    pub asset_id: i64,
    pub component_id: Option<i64>,
    pub sub_component_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub symptoms: SymptomList,
    pub reported_by: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub reported_at: OffsetDateTime,
    pub status: FailureStatus,
    pub priority: Option<Priority>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
    pub is_safety_related: bool,
    pub work_order_id: Option<i64>,
    pub attachments: AttachmentList,
    pub is_linked_duplicate: bool,
    pub linked_to_occurrence_id: Option<i64>,
    pub linked_by: Option<i64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub linked_at: Option<OffsetDateTime>,
    pub linked_reason: Option<String>,
}

/// Unit of repair work. Only the closure-gating flags matter to this engine;
/// scheduling and assignment belong to the surrounding platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkOrder {
    pub id: i64,
    pub tenant_id: i64,
    pub requires_return_to_production: bool,
    pub return_to_production_confirmed: bool,
}

/// One production-stoppage window. `ended_at = None` means the window is
/// still open; closing is a one-way transition that also fixes
/// `total_minutes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DowntimeLog {
    pub id: i64,
    pub tenant_id: i64,
    pub failure_occurrence_id: i64,
    pub work_order_id: Option<i64>,
    pub asset_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub category: DowntimeCategory,
    pub reason: Option<String>,
    pub production_impact: Option<String>,
    pub return_confirmed_by: Option<i64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub return_confirmed_at: Option<OffsetDateTime>,
    pub total_minutes: Option<i64>,
}

impl DowntimeLog {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// At most one per work order; created lazily the first time a requirement is
/// computed, updated in place thereafter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityAssuranceRecord {
    pub id: i64,
    pub tenant_id: i64,
    pub work_order_id: i64,
    pub is_required: bool,
    pub required_reason: Option<QaReason>,
    pub evidence_required: EvidenceLevel,
    pub status: QaStatus,
    pub evidence_provided: Option<AttachmentList>,
    pub return_to_production_confirmed: bool,
    pub confirmed_by: Option<i64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub confirmed_at: Option<OffsetDateTime>,
}

/// One historical repair record. Marked obsolete rather than deleted when
/// superseded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolutionApplied {
    pub id: i64,
    pub tenant_id: i64,
    pub failure_occurrence_id: i64,
    pub diagnosis: String,
    pub solution: String,
    pub confirmed_cause: Option<String>,
    pub outcome: SolutionOutcome,
    /// 1-5 when the technician rated the fix.
    pub effectiveness: Option<i64>,
    pub performed_by: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub performed_at: OffsetDateTime,
    pub actual_minutes: Option<i64>,
    pub final_component_id: Option<i64>,
    pub final_sub_component_id: Option<i64>,
    pub fix_type: Option<String>,
    pub tools_used: Option<ToolUsageList>,
    pub spare_parts_used: Option<SparePartUsageList>,
    pub is_obsolete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            FailureStatus::Open,
            FailureStatus::InProgress,
            FailureStatus::Reported,
            FailureStatus::Resolved,
            FailureStatus::ResolvedImmediate,
        ] {
            assert_eq!(FailureStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(FailureStatus::parse("CLOSED").is_err());
    }

    #[test]
    fn versioned_list_rejects_unknown_version() {
        let raw = r#"{"version":9,"items":[1,2]}"#;
        let err = SymptomList::decode(raw).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[test]
    fn versioned_list_encodes_current_version() {
        let list = SymptomList::new(vec![1, 2, 3]);
        let raw = list.encode().unwrap();
        assert_eq!(SymptomList::decode(&raw).unwrap(), list);
    }
}
