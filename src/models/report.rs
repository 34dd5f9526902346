use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    pub body: String,
}

/// Generated report text: one section per finding, in finding order
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportContent {
    pub summary: String,
    pub sections: Vec<ReportSection>,
    pub conclusion: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardingState {
    Pending,
    Forwarded,
    Failed,
}

/// Why a forwarding attempt failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForwardingFailure {
    /// Destination unreachable or it rejected the association
    SessionRefused,
    /// Association accepted but the object was rejected
    TransferRejected,
    /// Association dropped mid-transfer
    TransportFailure,
}

impl fmt::Display for ForwardingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ForwardingFailure::SessionRefused => "session-refused",
            ForwardingFailure::TransferRejected => "transfer-rejected",
            ForwardingFailure::TransportFailure => "transport-failure",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure {
        kind: ForwardingFailure,
        detail: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForwardingAttempt {
    /// Destination as `AE@host:port`
    pub destination: String,
    pub outcome: AttemptOutcome,
    pub attempted_at: DateTime<Utc>,
}

impl ForwardingAttempt {
    pub fn success(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            outcome: AttemptOutcome::Success,
            attempted_at: Utc::now(),
        }
    }

    pub fn failure(
        destination: impl Into<String>,
        kind: ForwardingFailure,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            outcome: AttemptOutcome::Failure {
                kind,
                detail: detail.into(),
            },
            attempted_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }

    pub fn failure_kind(&self) -> Option<ForwardingFailure> {
        match &self.outcome {
            AttemptOutcome::Success => None,
            AttemptOutcome::Failure { kind, .. } => Some(*kind),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub report_id: String,
    pub object_id: String,
    /// SOP Instance UID of the encoded structured report
    pub sr_instance_uid: String,
    pub content: ReportContent,
    pub generated_at: DateTime<Utc>,
    /// Location of the encoded document relative to the storage root
    pub document_key: String,
    pub forwarding_state: ForwardingState,
    #[serde(default)]
    pub attempts: Vec<ForwardingAttempt>,
}

impl Report {
    pub fn document_key_for(report_id: &str) -> String {
        format!("reports/{}.dcm", report_id)
    }

    /// Append an attempt and derive the forwarding state from it
    pub fn record_attempt(&mut self, attempt: ForwardingAttempt) {
        self.forwarding_state = if attempt.is_success() {
            ForwardingState::Forwarded
        } else if self.forwarding_state == ForwardingState::Forwarded {
            // an earlier delivery still stands
            ForwardingState::Forwarded
        } else {
            ForwardingState::Failed
        };
        self.attempts.push(attempt);
    }
}
