use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::report::ForwardingState;

/// Lifecycle state of one received object
///
/// `Received → Analyzing → Analyzed → ReportGenerated → Forwarded`, with
/// `Failed` reachable from every non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    Received,
    Analyzing,
    Analyzed,
    ReportGenerated,
    Forwarded,
    Failed,
}

impl ObjectState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ObjectState::Forwarded | ObjectState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: ObjectState) -> bool {
        use ObjectState::*;
        match (self, next) {
            (Received, Analyzing)
            | (Analyzing, Analyzed)
            | (Analyzed, ReportGenerated)
            | (ReportGenerated, Forwarded) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectState::Received => "received",
            ObjectState::Analyzing => "analyzing",
            ObjectState::Analyzed => "analyzed",
            ObjectState::ReportGenerated => "report_generated",
            ObjectState::Forwarded => "forwarded",
            ObjectState::Failed => "failed",
        }
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Modalities the relay accepts, one per negotiated storage class
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    CT,
    MR,
    DX,
    MG,
}

impl Modality {
    /// Parse a DICOM Modality (0008,0060) code; CR is folded into DX
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "CT" => Some(Modality::CT),
            "MR" => Some(Modality::MR),
            "DX" | "CR" => Some(Modality::DX),
            "MG" => Some(Modality::MG),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Modality::CT => "CT",
            Modality::MR => "MR",
            Modality::DX => "DX",
            Modality::MG => "MG",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An object received over DIMSE and tracked until its terminal state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncomingObject {
    /// SOP Instance UID
    pub id: String,
    pub modality: Modality,
    pub patient_id: String,
    #[serde(default)]
    pub study_instance_uid: Option<String>,
    #[serde(default)]
    pub series_instance_uid: Option<String>,
    #[serde(default)]
    pub sop_class_uid: Option<String>,
    /// Location of the received payload relative to the storage root
    pub storage_key: String,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: ObjectState,
    /// Bumped on every duplicate transfer; stale pipeline chains compare against it
    pub generation: u64,
    #[serde(default)]
    pub storage_released: bool,
    #[serde(default)]
    pub failure: Option<String>,
}

impl IncomingObject {
    pub fn new(id: impl Into<String>, modality: Modality, patient_id: impl Into<String>) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            storage_key: Self::storage_key_for(&id),
            id,
            modality,
            patient_id: patient_id.into(),
            study_instance_uid: None,
            series_instance_uid: None,
            sop_class_uid: None,
            received_at: now,
            updated_at: now,
            state: ObjectState::Received,
            generation: 0,
            storage_released: false,
            failure: None,
        }
    }

    pub fn storage_key_for(id: &str) -> String {
        format!("incoming/{}.dcm", id)
    }
}

/// Snapshot returned by status queries
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectStatus {
    pub id: String,
    pub modality: Modality,
    pub state: ObjectState,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub storage_released: bool,
    pub failure: Option<String>,
    pub forwarding_state: Option<ForwardingState>,
    pub forwarding_attempts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path_only() {
        use ObjectState::*;
        assert!(Received.can_transition_to(Analyzing));
        assert!(Analyzing.can_transition_to(Analyzed));
        assert!(Analyzed.can_transition_to(ReportGenerated));
        assert!(ReportGenerated.can_transition_to(Forwarded));

        assert!(!Received.can_transition_to(Analyzed));
        assert!(!Analyzed.can_transition_to(Analyzing));
        assert!(!ReportGenerated.can_transition_to(Received));
        assert!(!Received.can_transition_to(Received));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        use ObjectState::*;
        for state in [Received, Analyzing, Analyzed, ReportGenerated] {
            assert!(state.can_transition_to(Failed), "{state} -> failed");
        }
        assert!(!Forwarded.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
        assert!(Forwarded.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn test_modality_codes() {
        assert_eq!(Modality::from_code("mg"), Some(Modality::MG));
        assert_eq!(Modality::from_code("CR"), Some(Modality::DX));
        assert_eq!(Modality::from_code("US"), None);
        assert_eq!(Modality::CT.to_string(), "CT");
    }

    #[test]
    fn test_new_object_is_received() {
        let object = IncomingObject::new("1.2.3", Modality::CT, "PAT1");
        assert_eq!(object.state, ObjectState::Received);
        assert_eq!(object.storage_key, "incoming/1.2.3.dcm");
        assert_eq!(object.generation, 0);
        assert!(!object.storage_released);
    }
}
