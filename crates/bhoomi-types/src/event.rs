//! Lifecycle events and their typed payloads.
//!
//! `EventType` is the closed enumeration of things that can happen to a
//! landowner/survey row. `EventPayload` is a tagged union keyed by event type:
//! each variant carries only the fields relevant to that event, while the
//! survey-complete snapshot carries the full canonicalized source row. The
//! serialized form uses the wire names the dashboards already consume.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::LedgerError;

/// Type of event captured by a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "JMR_Measurement_Uploaded")]
    JmrMeasurementUploaded,
    #[serde(rename = "Notice_Generated")]
    NoticeGenerated,
    #[serde(rename = "Payment_Slip_Created")]
    PaymentSlipCreated,
    #[serde(rename = "Payment_Released")]
    PaymentReleased,
    #[serde(rename = "Payment_Pending")]
    PaymentPending,
    #[serde(rename = "Payment_Failed")]
    PaymentFailed,
    #[serde(rename = "Ownership_Updated")]
    OwnershipUpdated,
    #[serde(rename = "Award_Declared")]
    AwardDeclared,
    #[serde(rename = "Compensated")]
    Compensated,
    #[serde(rename = "Survey_Complete_Snapshot")]
    SurveyCompleteSnapshot,
}

impl EventType {
    /// The wire name used in persisted entries and HTTP payloads.
    pub fn wire_name(&self) -> &'static str {
        match self {
            EventType::JmrMeasurementUploaded => "JMR_Measurement_Uploaded",
            EventType::NoticeGenerated => "Notice_Generated",
            EventType::PaymentSlipCreated => "Payment_Slip_Created",
            EventType::PaymentReleased => "Payment_Released",
            EventType::PaymentPending => "Payment_Pending",
            EventType::PaymentFailed => "Payment_Failed",
            EventType::OwnershipUpdated => "Ownership_Updated",
            EventType::AwardDeclared => "Award_Declared",
            EventType::Compensated => "Compensated",
            EventType::SurveyCompleteSnapshot => "Survey_Complete_Snapshot",
        }
    }

    /// Parse a wire name back into an event type.
    pub fn from_wire_name(raw: &str) -> Result<Self, LedgerError> {
        serde_json::from_value(Value::String(raw.to_string()))
            .map_err(|_| LedgerError::InvalidEntryInput(format!("unknown event type {raw:?}")))
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Event-specific data snapshot, hashed as part of entry integrity.
///
/// Serialized as `{"event": <wire name>, "data": {...}}` so the tag matches
/// the entry's `event_type` and the hash preimage stays self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum EventPayload {
    #[serde(rename = "JMR_Measurement_Uploaded")]
    JmrMeasurement {
        measured_area_sq_m: f64,
        village: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        taluka: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        jmr_reference: Option<String>,
    },
    #[serde(rename = "Notice_Generated")]
    NoticeGenerated {
        notice_number: String,
        notice_date: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compensation_amount: Option<f64>,
    },
    #[serde(rename = "Payment_Slip_Created")]
    PaymentSlipCreated { slip_number: String, amount: f64 },
    #[serde(rename = "Payment_Released")]
    PaymentReleased {
        amount: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        utr_number: Option<String>,
    },
    #[serde(rename = "Payment_Pending")]
    PaymentPending { amount: f64 },
    #[serde(rename = "Payment_Failed")]
    PaymentFailed { amount: f64, failure_reason: String },
    #[serde(rename = "Ownership_Updated")]
    OwnershipUpdated {
        owner_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_owner: Option<String>,
    },
    #[serde(rename = "Award_Declared")]
    AwardDeclared {
        award_number: String,
        award_amount: f64,
    },
    #[serde(rename = "Compensated")]
    Compensated { amount: f64, paid_on: String },
    #[serde(rename = "Survey_Complete_Snapshot")]
    SurveyRecord { record: Value },
}

impl EventPayload {
    /// The event type this payload belongs to.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::JmrMeasurement { .. } => EventType::JmrMeasurementUploaded,
            EventPayload::NoticeGenerated { .. } => EventType::NoticeGenerated,
            EventPayload::PaymentSlipCreated { .. } => EventType::PaymentSlipCreated,
            EventPayload::PaymentReleased { .. } => EventType::PaymentReleased,
            EventPayload::PaymentPending { .. } => EventType::PaymentPending,
            EventPayload::PaymentFailed { .. } => EventType::PaymentFailed,
            EventPayload::OwnershipUpdated { .. } => EventType::OwnershipUpdated,
            EventPayload::AwardDeclared { .. } => EventType::AwardDeclared,
            EventPayload::Compensated { .. } => EventType::Compensated,
            EventPayload::SurveyRecord { .. } => EventType::SurveyCompleteSnapshot,
        }
    }

    /// Build a payload for the given event type from untyped metadata.
    ///
    /// Used by the manual timeline-entry surface where callers submit an
    /// action name plus a metadata object. Fields that don't match the
    /// variant's shape are rejected, never silently dropped.
    pub fn from_parts(event_type: EventType, metadata: Value) -> Result<Self, LedgerError> {
        let tagged = serde_json::json!({
            "event": event_type.wire_name(),
            "data": metadata,
        });
        serde_json::from_value(tagged).map_err(|e| {
            LedgerError::InvalidEntryInput(format!(
                "metadata does not match event type {event_type}: {e}"
            ))
        })
    }

    /// Build a survey-complete snapshot from a source-of-truth row.
    pub fn snapshot(record: Value) -> Result<Self, LedgerError> {
        if !record.is_object() {
            return Err(LedgerError::InvalidEntryInput(
                "snapshot record must be a JSON object".to_string(),
            ));
        }
        Ok(EventPayload::SurveyRecord { record })
    }

    /// The payload as a JSON value, ready for canonical serialization.
    pub fn to_value(&self) -> Value {
        // Serialization of these variants cannot fail: every field is a
        // plain JSON-representable type.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_names_round_trip() {
        for event in [
            EventType::JmrMeasurementUploaded,
            EventType::NoticeGenerated,
            EventType::PaymentSlipCreated,
            EventType::PaymentReleased,
            EventType::PaymentPending,
            EventType::PaymentFailed,
            EventType::OwnershipUpdated,
            EventType::AwardDeclared,
            EventType::Compensated,
            EventType::SurveyCompleteSnapshot,
        ] {
            let parsed = EventType::from_wire_name(event.wire_name()).unwrap();
            assert_eq!(parsed, event);
        }
    }

    #[test]
    fn unknown_wire_name_is_rejected() {
        let err = EventType::from_wire_name("Mined_A_Block").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidEntryInput(_)));
    }

    #[test]
    fn payload_tag_matches_event_type() {
        let payload = EventPayload::NoticeGenerated {
            notice_number: "N-2024-17".to_string(),
            notice_date: "2024-11-02".to_string(),
            compensation_amount: Some(1_250_000.0),
        };
        let value = payload.to_value();
        assert_eq!(value["event"], "Notice_Generated");
        assert_eq!(value["data"]["notice_number"], "N-2024-17");
    }

    #[test]
    fn from_parts_builds_typed_variant() {
        let payload = EventPayload::from_parts(
            EventType::PaymentReleased,
            json!({"amount": 500000.0, "utr_number": "UTR123"}),
        )
        .unwrap();
        assert_eq!(payload.event_type(), EventType::PaymentReleased);
    }

    #[test]
    fn from_parts_rejects_mismatched_metadata() {
        let err = EventPayload::from_parts(
            EventType::JmrMeasurementUploaded,
            json!({"amount": 500000.0}),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidEntryInput(_)));
    }

    #[test]
    fn snapshot_requires_object() {
        assert!(EventPayload::snapshot(json!([1, 2, 3])).is_err());
        assert!(EventPayload::snapshot(json!({"owner_name": "A. Patil"})).is_ok());
    }
}
