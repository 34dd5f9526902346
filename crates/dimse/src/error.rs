//! Error types for DIMSE operations

use thiserror::Error;

/// Result type alias for DIMSE operations
pub type Result<T> = std::result::Result<T, DimseError>;

/// Error types that can occur during DIMSE operations
#[derive(Error, Debug)]
pub enum DimseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("DICOM parsing error: {0}")]
    DicomParsing(String),

    #[error("DICOM object error: {0}")]
    DicomObject(String),

    #[error("DICOM UL error: {0}")]
    DicomUl(String),

    /// The remote node refused or could not establish the association
    #[error("Association rejected: {0}")]
    AssociationRejected(String),

    /// A presentation context or SOP class outside the negotiated set
    #[error("Unsupported SOP class: {0}")]
    UnsupportedSopClass(String),

    /// The remote node answered the C-STORE with a non-success status
    #[error("C-STORE rejected with status 0x{status:04X}")]
    StoreRejected { status: u16 },

    /// The association dropped or misbehaved mid-exchange
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Invalid AE Title: {0}")]
    InvalidAeTitle(String),

    #[error("Timeout occurred: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DimseError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error happened before an association existed
    ///
    /// Covers refused or unreachable nodes and node settings that prevent
    /// a session from being attempted at all.
    pub fn is_session_refused(&self) -> bool {
        matches!(
            self,
            DimseError::AssociationRejected(_) | DimseError::InvalidAeTitle(_) | DimseError::Config(_)
        )
    }
}
