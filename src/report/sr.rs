//! DICOM Basic Text SR encoding
//!
//! Layout: a CONTAINER root (LN 18782-3 "Radiology Report") holding one TEXT
//! item for the summary (DCM 121111), one per section (DCM 121071) and one
//! for the conclusion (DCM 121070). Patient and study attributes come from the
//! analysed object; the report gets its own series. Text is always
//! declared and written as UTF-8 (ISO_IR 192), whatever the source used.

use chrono::{DateTime, Utc};
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use dimse::types::{string_attr, EXPLICIT_VR_LITTLE_ENDIAN};
use dimse::StorageClass;
use uuid::Uuid;

use crate::models::ReportContent;
use crate::report::CompositionError;

pub const REPORT_SERIES_NUMBER: &str = "9999";

/// Specific Character Set of every report: text values are written as UTF-8
pub const REPORT_CHARACTER_SET: &str = "ISO_IR 192";

/// Attributes copied verbatim from the source object when present
const COPIED_ATTRIBUTES: [(Tag, VR); 10] = [
    (tags::PATIENT_NAME, VR::PN),
    (tags::PATIENT_BIRTH_DATE, VR::DA),
    (tags::PATIENT_SEX, VR::CS),
    (tags::STUDY_INSTANCE_UID, VR::UI),
    (tags::STUDY_DATE, VR::DA),
    (tags::STUDY_TIME, VR::TM),
    (tags::STUDY_ID, VR::SH),
    (tags::ACCESSION_NUMBER, VR::SH),
    (tags::STUDY_DESCRIPTION, VR::LO),
    (tags::REFERRING_PHYSICIAN_NAME, VR::PN),
];

/// A UID under the 2.25 root derived from a random UUID
pub fn new_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

fn code_item(value: &str, scheme: &str, meaning: &str) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        DataElement::new(tags::CODE_VALUE, VR::SH, PrimitiveValue::from(value)),
        DataElement::new(tags::CODING_SCHEME_DESIGNATOR, VR::SH, PrimitiveValue::from(scheme)),
        DataElement::new(tags::CODE_MEANING, VR::LO, PrimitiveValue::from(meaning)),
    ])
}

fn text_item(code: &str, meaning: &str, text: &str) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        DataElement::new(tags::RELATIONSHIP_TYPE, VR::CS, PrimitiveValue::from("CONTAINS")),
        DataElement::new(tags::VALUE_TYPE, VR::CS, PrimitiveValue::from("TEXT")),
        DataElement::new(
            tags::CONCEPT_NAME_CODE_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![code_item(code, "DCM", meaning)]),
        ),
        DataElement::new(tags::TEXT_VALUE, VR::UT, PrimitiveValue::from(text)),
    ])
}

/// Encode the report as a Part 10 Basic Text SR file
pub fn encode_basic_text_sr(
    source: Option<&InMemDicomObject>,
    patient_id: &str,
    sr_instance_uid: &str,
    content: &ReportContent,
    now: DateTime<Utc>,
) -> Result<Vec<u8>, CompositionError> {
    let sop_class = StorageClass::BasicTextSr.uid();
    let date = now.format("%Y%m%d").to_string();
    let time = now.format("%H%M%S").to_string();

    let mut sr = InMemDicomObject::new_empty();
    sr.put(DataElement::new(
        tags::SPECIFIC_CHARACTER_SET,
        VR::CS,
        PrimitiveValue::from(REPORT_CHARACTER_SET),
    ));
    if let Some(source) = source {
        for (tag, vr) in COPIED_ATTRIBUTES {
            if let Some(value) = string_attr(source, tag) {
                sr.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
            }
        }
    }

    let defaults = [
        (tags::PATIENT_NAME, VR::PN, "ANONYMOUS^PATIENT".to_string()),
        (tags::STUDY_INSTANCE_UID, VR::UI, new_uid()),
        (tags::STUDY_DATE, VR::DA, date.clone()),
        (tags::STUDY_TIME, VR::TM, time.clone()),
        (tags::STUDY_DESCRIPTION, VR::LO, "AI analysis".to_string()),
    ];
    for (tag, vr, value) in defaults {
        if sr.element(tag).is_err() {
            sr.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
        }
    }

    let mut items = Vec::with_capacity(content.sections.len() + 2);
    items.push(text_item("121111", "Summary", &content.summary));
    for section in &content.sections {
        items.push(text_item("121071", "Finding", &section.body));
    }
    items.push(text_item("121070", "Findings Summary", &content.conclusion));

    let series_uid = new_uid();
    let elements = [
        (tags::SOP_CLASS_UID, VR::UI, sop_class),
        (tags::SOP_INSTANCE_UID, VR::UI, sr_instance_uid),
        (tags::PATIENT_ID, VR::LO, patient_id),
        (tags::SERIES_INSTANCE_UID, VR::UI, series_uid.as_str()),
        (tags::MODALITY, VR::CS, "SR"),
        (tags::SERIES_NUMBER, VR::IS, REPORT_SERIES_NUMBER),
        (tags::INSTANCE_NUMBER, VR::IS, "1"),
        (tags::SERIES_DATE, VR::DA, date.as_str()),
        (tags::SERIES_TIME, VR::TM, time.as_str()),
        (tags::SERIES_DESCRIPTION, VR::LO, "AI analysis report"),
        (tags::CONTENT_DATE, VR::DA, date.as_str()),
        (tags::CONTENT_TIME, VR::TM, time.as_str()),
        (tags::VALUE_TYPE, VR::CS, "CONTAINER"),
        (tags::CONTINUITY_OF_CONTENT, VR::CS, "SEPARATE"),
        (tags::COMPLETION_FLAG, VR::CS, "COMPLETE"),
        (tags::VERIFICATION_FLAG, VR::CS, "UNVERIFIED"),
    ];
    for (tag, vr, value) in elements {
        sr.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
    }
    sr.put(DataElement::new(
        tags::CONCEPT_NAME_CODE_SEQUENCE,
        VR::SQ,
        DataSetSequence::from(vec![code_item("18782-3", "LN", "Radiology Report")]),
    ));
    sr.put(DataElement::new(
        tags::CONTENT_SEQUENCE,
        VR::SQ,
        DataSetSequence::from(items),
    ));

    let file = sr
        .with_meta(
            FileMetaTableBuilder::new()
                .media_storage_sop_class_uid(sop_class)
                .media_storage_sop_instance_uid(sr_instance_uid)
                .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN),
        )
        .map_err(|e| CompositionError::Encode(e.to_string()))?;

    let mut buf = Vec::new();
    file.write_all(&mut buf)
        .map_err(|e| CompositionError::Encode(e.to_string()))?;
    Ok(buf)
}
