//! Common types for DIMSE operations

use bytes::Bytes;
use dicom_dictionary_std::tags;
use dicom_object::{DefaultDicomObject, InMemDicomObject};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Implicit VR Little Endian transfer syntax UID
pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";

/// Explicit VR Little Endian transfer syntax UID
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

/// Verification SOP class UID (C-ECHO)
pub const VERIFICATION_SOP_CLASS: &str = "1.2.840.10008.1.1";

/// Represents a DICOM dataset as either in-memory bytes or a file path
///
/// Both variants hold a complete DICOM Part 10 file (preamble, file meta
/// group and data set).
#[derive(Debug)]
pub enum DatasetStream {
    /// DICOM file in memory
    Memory {
        /// Raw DICOM bytes
        data: Bytes,
        /// Associated metadata
        metadata: DatasetMetadata,
    },
    /// DICOM file on disk
    File {
        /// Path to the file
        path: PathBuf,
        /// Associated metadata
        metadata: DatasetMetadata,
        /// Whether to delete the file when dropped
        delete_on_drop: bool,
    },
}

/// Metadata associated with a DICOM dataset
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DatasetMetadata {
    /// Unique identifier for this dataset
    pub id: Uuid,

    /// Transfer syntax UID
    pub transfer_syntax: Option<String>,

    /// SOP Class UID
    pub sop_class_uid: Option<String>,

    /// SOP Instance UID
    pub sop_instance_uid: Option<String>,

    /// Study Instance UID
    pub study_instance_uid: Option<String>,

    /// Series Instance UID
    pub series_instance_uid: Option<String>,

    /// Patient ID
    pub patient_id: Option<String>,

    /// Modality code (CT, MR, DX, MG, ...)
    pub modality: Option<String>,

    /// Calling AE title of the association that delivered the dataset
    pub calling_aet: Option<String>,

    /// Timestamp when dataset was received/created
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Size of the dataset in bytes
    pub size_bytes: Option<u64>,
}

/// Storage SOP classes known to this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    /// CT Image Storage
    Ct,
    /// MR Image Storage
    Mr,
    /// Digital X-Ray Image Storage - For Presentation
    DigitalXRay,
    /// Digital Mammography X-Ray Image Storage - For Presentation
    DigitalMammography,
    /// Basic Text SR Storage
    BasicTextSr,
}

impl StorageClass {
    /// Image classes accepted by the inbound listener by default
    pub const IMAGE_CLASSES: [StorageClass; 4] = [
        StorageClass::Ct,
        StorageClass::Mr,
        StorageClass::DigitalXRay,
        StorageClass::DigitalMammography,
    ];

    /// SOP Class UID
    pub fn uid(&self) -> &'static str {
        match self {
            StorageClass::Ct => "1.2.840.10008.5.1.4.1.1.2",
            StorageClass::Mr => "1.2.840.10008.5.1.4.1.1.4",
            StorageClass::DigitalXRay => "1.2.840.10008.5.1.4.1.1.1.1",
            StorageClass::DigitalMammography => "1.2.840.10008.5.1.4.1.1.1.2",
            StorageClass::BasicTextSr => "1.2.840.10008.5.1.4.1.1.88.11",
        }
    }

    /// Modality code normally carried by instances of this class
    pub fn modality(&self) -> &'static str {
        match self {
            StorageClass::Ct => "CT",
            StorageClass::Mr => "MR",
            StorageClass::DigitalXRay => "DX",
            StorageClass::DigitalMammography => "MG",
            StorageClass::BasicTextSr => "SR",
        }
    }

    /// Look up a class by SOP Class UID (trailing padding tolerated)
    pub fn from_uid(uid: &str) -> Option<Self> {
        let uid = trim_uid(uid);
        [
            StorageClass::Ct,
            StorageClass::Mr,
            StorageClass::DigitalXRay,
            StorageClass::DigitalMammography,
            StorageClass::BasicTextSr,
        ]
        .into_iter()
        .find(|class| class.uid() == uid)
    }
}

/// Per-transfer reply status of a C-STORE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    /// 0x0000
    Success,
    /// 0x0110
    ProcessingFailure,
}

impl StoreStatus {
    /// DIMSE status code sent on the wire
    pub fn code(&self) -> u16 {
        match self {
            StoreStatus::Success => 0x0000,
            StoreStatus::ProcessingFailure => 0x0110,
        }
    }

    /// Whether a status code received from a peer means the object was stored
    ///
    /// Warning statuses (0xB000, 0xB006, 0xB007) still mean the object was kept.
    pub fn is_stored(code: u16) -> bool {
        code == 0x0000 || (0xB000..=0xBFFF).contains(&code)
    }
}

/// Strip DICOM UID padding (trailing NUL or space)
pub fn trim_uid(uid: &str) -> &str {
    uid.trim_end_matches(['\0', ' '])
}

/// Parse a DICOM Part 10 file held in memory, with or without its 128-byte preamble
pub fn parse_part10(bytes: &[u8]) -> crate::error::Result<DefaultDicomObject> {
    let start = if bytes.len() >= 132 && &bytes[128..132] == b"DICM" {
        128
    } else {
        0
    };
    dicom_object::from_reader(&bytes[start..])
        .map_err(|e| crate::error::DimseError::DicomParsing(e.to_string()))
}

impl DatasetStream {
    /// Create a new in-memory dataset
    pub fn from_bytes(data: Bytes, metadata: DatasetMetadata) -> Self {
        Self::Memory { data, metadata }
    }

    /// Create a new file-based dataset
    pub fn from_file(path: PathBuf, delete_on_drop: bool) -> Self {
        Self::File {
            path,
            metadata: DatasetMetadata::new(),
            delete_on_drop,
        }
    }

    /// Get the metadata for this dataset
    pub fn metadata(&self) -> &DatasetMetadata {
        match self {
            Self::Memory { metadata, .. } => metadata,
            Self::File { metadata, .. } => metadata,
        }
    }

    /// Get mutable metadata for this dataset
    pub fn metadata_mut(&mut self) -> &mut DatasetMetadata {
        match self {
            Self::Memory { metadata, .. } => metadata,
            Self::File { metadata, .. } => metadata,
        }
    }

    /// Convert to bytes (loading from file if necessary)
    pub async fn to_bytes(&self) -> crate::error::Result<Bytes> {
        match self {
            Self::Memory { data, .. } => Ok(data.clone()),
            Self::File { path, .. } => {
                let bytes = tokio::fs::read(path).await?;
                Ok(Bytes::from(bytes))
            }
        }
    }
}

impl DatasetMetadata {
    /// Create new metadata with a unique ID and current timestamp
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            ..Default::default()
        }
    }

    /// Extract identifying attributes from a parsed data set
    pub fn from_object(object: &InMemDicomObject) -> Self {
        Self {
            sop_class_uid: string_attr(object, tags::SOP_CLASS_UID),
            sop_instance_uid: string_attr(object, tags::SOP_INSTANCE_UID),
            study_instance_uid: string_attr(object, tags::STUDY_INSTANCE_UID),
            series_instance_uid: string_attr(object, tags::SERIES_INSTANCE_UID),
            patient_id: string_attr(object, tags::PATIENT_ID),
            modality: string_attr(object, tags::MODALITY),
            ..Self::new()
        }
    }
}

/// Read a string attribute, trimming padding; empty values count as absent
pub fn string_attr(object: &InMemDicomObject, tag: dicom_core::Tag) -> Option<String> {
    object
        .element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches('\0').trim().to_string())
        .filter(|s| !s.is_empty())
}

// Implement Drop for DatasetStream to handle file cleanup
impl Drop for DatasetStream {
    fn drop(&mut self) {
        if let DatasetStream::File {
            path,
            delete_on_drop,
            ..
        } = self
        {
            if *delete_on_drop {
                if let Err(e) = std::fs::remove_file(&*path) {
                    tracing::warn!("Failed to delete temporary DICOM file {:?}: {}", path, e);
                }
            }
        }
    }
}
