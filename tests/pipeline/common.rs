#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use dimse::types::{parse_part10, EXPLICIT_VR_LITTLE_ENDIAN};
use dimse::{DatasetMetadata, DatasetStream, RemoteNode, StorageClass, StoreRequest};
use pacsai::analyzer::{AnalysisInput, Analyzer, AnalyzerError, AnalyzerOutput, AnomalyScorer, ModalityRuleAnalyzer};
use pacsai::config::Config;
use pacsai::forward::{DeliveryError, ReportTransport};
use pacsai::models::ForwardingFailure;
use pacsai::state::ObjectRegistry;
use pacsai::storage::{FilesystemStorage, StorageBackend};
use pacsai::Assembly;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Scorer returning the same anomaly score for every image
pub struct FixedScore(pub f64);

#[async_trait]
impl AnomalyScorer for FixedScore {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn score(&self, _input: &AnalysisInput) -> Result<f64, AnalyzerError> {
        Ok(self.0)
    }
}

pub fn rule_analyzer(score: f64) -> Arc<dyn Analyzer> {
    Arc::new(ModalityRuleAnalyzer::new(FixedScore(score), 0.8, "test-rules"))
}

/// Analyzer that never answers
pub struct StuckAnalyzer;

#[async_trait]
impl Analyzer for StuckAnalyzer {
    fn version(&self) -> &str {
        "stuck"
    }

    async fn analyze(&self, _input: &AnalysisInput) -> Result<Option<AnalyzerOutput>, AnalyzerError> {
        std::future::pending().await
    }
}

/// Transport recording every send; the outcome can be switched between sends
#[derive(Default)]
pub struct ScriptedTransport {
    failure: Mutex<Option<ForwardingFailure>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn failing(kind: ForwardingFailure) -> Self {
        let transport = Self::default();
        transport.set_failure(Some(kind));
        transport
    }

    pub fn set_failure(&self, kind: Option<ForwardingFailure>) {
        *self.failure.lock().unwrap() = kind;
    }

    /// `(destination, SR instance UID)` per send
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportTransport for ScriptedTransport {
    async fn send(&self, destination: &RemoteNode, document: DatasetStream) -> Result<(), DeliveryError> {
        let uid = document.metadata().sop_instance_uid.clone().unwrap_or_default();
        self.sent.lock().unwrap().push((destination.descriptor(), uid));
        match *self.failure.lock().unwrap() {
            Some(kind) => Err(DeliveryError::new(kind, "scripted failure")),
            None => Ok(()),
        }
    }
}

pub struct TestRelay {
    pub dir: TempDir,
    pub storage: Arc<dyn StorageBackend>,
    pub registry: ObjectRegistry,
    pub assembly: Assembly,
}

pub fn relay(config: Config, analyzer: Arc<dyn Analyzer>, transport: Arc<dyn ReportTransport>) -> TestRelay {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn StorageBackend> = Arc::new(FilesystemStorage::new(dir.path()).unwrap());
    let registry = ObjectRegistry::in_memory();
    let assembly = pacsai::assemble(&config, registry.clone(), storage.clone(), analyzer, transport);
    TestRelay {
        dir,
        storage,
        registry,
        assembly,
    }
}

/// A 2x2 8-bit monochrome Part 10 image
pub fn image(sop_instance_uid: &str, modality: &str, patient_id: &str) -> Vec<u8> {
    let sop_class = match modality {
        "MR" => StorageClass::Mr,
        "DX" => StorageClass::DigitalXRay,
        "MG" => StorageClass::DigitalMammography,
        _ => StorageClass::Ct,
    }
    .uid();
    let object = InMemDicomObject::from_element_iter([
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(sop_class)),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_instance_uid)),
        DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.826.0.1.200")),
        DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.826.0.1.201")),
        DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from(patient_id)),
        DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("DOE^JANE")),
        DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from(modality)),
        DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
        DataElement::new(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, PrimitiveValue::from("MONOCHROME2")),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(2_u16)),
        DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(2_u16)),
        DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(8_u16)),
        DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(8_u16)),
        DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(7_u16)),
        DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
        DataElement::new(tags::PIXEL_DATA, VR::OB, PrimitiveValue::from(vec![10_u8, 20, 30, 40])),
    ]);
    let file = object
        .with_meta(
            FileMetaTableBuilder::new()
                .media_storage_sop_class_uid(sop_class)
                .media_storage_sop_instance_uid(sop_instance_uid)
                .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN),
        )
        .unwrap();
    let mut buf = Vec::new();
    file.write_all(&mut buf).unwrap();
    buf
}

pub fn store_request(bytes: Vec<u8>) -> StoreRequest {
    let metadata = DatasetMetadata::from_object(&parse_part10(&bytes).unwrap());
    StoreRequest {
        calling_aet: "CT_SCANNER".into(),
        dataset: DatasetStream::from_bytes(Bytes::from(bytes), metadata),
    }
}
