//! DIMSE (DICOM Message Service Element) storage services
//!
//! This crate provides the protocol side of the pacsai relay:
//! a Service Class Provider that accepts C-STORE (and C-ECHO) requests and a
//! Service Class User that pushes a single object to a remote node.
//!
//! # Features
//! - Inbound storage (SCP): per-class presentation context negotiation,
//!   multiple C-STORE requests per association, pluggable [`scp::StoreHandler`]
//! - Outbound storage (SCU): one fresh association per C-STORE
//! - DIMSE command set encoding and parsing ([`message`])

pub mod config;
pub mod error;
pub mod message;
pub mod scp;
pub mod scu;
pub mod types;

// Re-export commonly used types
pub use config::{DimseConfig, RemoteNode};
pub use error::{DimseError, Result};
pub use scp::{BoundScp, DimseScp, StoreHandler, StoreRequest};
pub use scu::DimseScu;
pub use types::{DatasetMetadata, DatasetStream, StorageClass, StoreStatus};

/// DIMSE protocol version
pub const DIMSE_VERSION: &str = "0.2.0";

/// Default DICOM port (non-TLS)
pub const DEFAULT_DIMSE_PORT: u16 = 11112;
