//! RowKey: stable composite identifier for one landowner/survey row.
//!
//! A row key ties every ledger entry to a single row of the external
//! system-of-record: `(project, new/old survey number, CTS number, serial)`.
//! The canonical string encoding `project:{old|NA}+{new|NA}:{cts|NA}:{serial}`
//! is what gets hashed, persisted, and accepted back on the wire, so it must
//! never change once entries exist for a key.

use serde::{Deserialize, Serialize};

use crate::LedgerError;

/// Placeholder used in the canonical encoding for an absent component.
const ABSENT: &str = "NA";

/// Composite identifier for one landowner/survey row within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub project_id: String,
    pub new_survey_number: Option<String>,
    pub old_survey_number: Option<String>,
    pub cts_number: Option<String>,
    pub serial_number: Option<String>,
}

impl RowKey {
    /// Build a row key from raw identifier fields.
    ///
    /// Empty strings and the `"NA"` placeholder (any case) are folded to
    /// absent. Requires a project id and at least one of new survey number,
    /// old survey number, or serial number.
    pub fn new(
        project_id: &str,
        new_survey_number: Option<&str>,
        old_survey_number: Option<&str>,
        cts_number: Option<&str>,
        serial_number: Option<&str>,
    ) -> Result<Self, LedgerError> {
        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(LedgerError::InvalidEntryInput(
                "project_id is required".to_string(),
            ));
        }

        let key = Self {
            project_id: project_id.to_string(),
            new_survey_number: normalize(new_survey_number),
            old_survey_number: normalize(old_survey_number),
            cts_number: normalize(cts_number),
            serial_number: normalize(serial_number),
        };

        if key.new_survey_number.is_none()
            && key.old_survey_number.is_none()
            && key.serial_number.is_none()
        {
            return Err(LedgerError::InvalidEntryInput(
                "at least one of new_survey_number, old_survey_number, serial_number is required"
                    .to_string(),
            ));
        }

        Ok(key)
    }

    /// The survey number this row chains under: the new number when present,
    /// otherwise the old one.
    pub fn effective_survey(&self) -> Option<&str> {
        self.new_survey_number
            .as_deref()
            .or(self.old_survey_number.as_deref())
    }

    /// Canonical string encoding: `project:{old|NA}+{new|NA}:{cts|NA}:{serial}`.
    pub fn canonical(&self) -> String {
        format!(
            "{}:{}+{}:{}:{}",
            self.project_id,
            self.old_survey_number.as_deref().unwrap_or(ABSENT),
            self.new_survey_number.as_deref().unwrap_or(ABSENT),
            self.cts_number.as_deref().unwrap_or(ABSENT),
            self.serial_number.as_deref().unwrap_or_default(),
        )
    }

    /// Parse the canonical encoding back into a row key.
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 4 {
            return Err(LedgerError::InvalidEntryInput(format!(
                "malformed row key {raw:?}: expected project:old+new:cts:serial"
            )));
        }

        let (old_survey, new_survey) = match parts[1].split_once('+') {
            Some((old, new)) => (Some(old), Some(new)),
            // A bare survey component is treated as the new survey number.
            None => (None, Some(parts[1])),
        };

        Self::new(parts[0], new_survey, old_survey, Some(parts[2]), Some(parts[3]))
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

fn normalize(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(ABSENT) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_round_trips() {
        let key = RowKey::new("P1", Some("S-40"), None, Some("CTS-9"), Some("1")).unwrap();
        assert_eq!(key.canonical(), "P1:NA+S-40:CTS-9:1");

        let parsed = RowKey::parse(&key.canonical()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn na_and_empty_fold_to_absent() {
        let key = RowKey::new("P1", Some("S-40"), Some("na"), Some(""), Some("NA")).unwrap();
        assert!(key.old_survey_number.is_none());
        assert!(key.cts_number.is_none());
        assert!(key.serial_number.is_none());
    }

    #[test]
    fn requires_project_id() {
        let err = RowKey::new("  ", Some("S-40"), None, None, None).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidEntryInput(_)));
    }

    #[test]
    fn requires_some_identifier() {
        let err = RowKey::new("P1", None, Some("NA"), Some("CTS-9"), None).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidEntryInput(_)));
    }

    #[test]
    fn effective_survey_prefers_new() {
        let key = RowKey::new("P1", Some("S-40"), Some("S-12"), None, None).unwrap();
        assert_eq!(key.effective_survey(), Some("S-40"));

        let old_only = RowKey::new("P1", None, Some("S-12"), None, None).unwrap();
        assert_eq!(old_only.effective_survey(), Some("S-12"));
    }

    #[test]
    fn parse_bare_survey_component() {
        let key = RowKey::parse("P1:S-40:NA:2").unwrap();
        assert_eq!(key.new_survey_number.as_deref(), Some("S-40"));
        assert!(key.old_survey_number.is_none());
        assert_eq!(key.serial_number.as_deref(), Some("2"));
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(RowKey::parse("P1:S-40").is_err());
        assert!(RowKey::parse("").is_err());
    }
}
