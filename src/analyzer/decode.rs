use dicom_dictionary_std::tags;
use dicom_pixeldata::PixelDecoder;
use dimse::types::{parse_part10, string_attr};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::analyzer::{keys, AnalysisInput, PixelPayload};
use crate::models::Modality;

/// Window applied to CT images that carry none
const DEFAULT_CT_WINDOW_CENTER: &str = "40";
const DEFAULT_CT_WINDOW_WIDTH: &str = "400";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to parse DICOM file: {0}")]
    Parse(String),

    #[error("failed to decode pixel data: {0}")]
    PixelData(String),
}

/// Build analyzer input from a stored Part 10 file
///
/// CPU bound; callers on the runtime should use `spawn_blocking`.
pub fn decode_input(object_id: &str, modality: Modality, bytes: &[u8]) -> Result<AnalysisInput, DecodeError> {
    let object = parse_part10(bytes).map_err(|e| DecodeError::Parse(e.to_string()))?;

    let decoded = object
        .decode_pixel_data()
        .map_err(|e| DecodeError::PixelData(e.to_string()))?;
    let pixels = PixelPayload {
        rows: decoded.rows(),
        columns: decoded.columns(),
        frames: decoded.number_of_frames(),
        samples_per_pixel: decoded.samples_per_pixel(),
        bits_allocated: decoded.bits_allocated(),
        data: decoded.data().to_vec(),
    };

    let mut metadata = BTreeMap::new();
    metadata.insert(keys::MODALITY.to_string(), modality.code().to_string());
    for (key, tag) in [
        (keys::SOP_INSTANCE_UID, tags::SOP_INSTANCE_UID),
        (keys::STUDY_INSTANCE_UID, tags::STUDY_INSTANCE_UID),
        (keys::SERIES_INSTANCE_UID, tags::SERIES_INSTANCE_UID),
        (keys::PATIENT_ID, tags::PATIENT_ID),
        (keys::WINDOW_CENTER, tags::WINDOW_CENTER),
        (keys::WINDOW_WIDTH, tags::WINDOW_WIDTH),
    ] {
        if let Some(value) = string_attr(&object, tag) {
            // multi-valued windows keep their first value
            let first = value.split('\\').next().unwrap_or_default().trim().to_string();
            metadata.insert(key.to_string(), first);
        }
    }
    metadata.insert(keys::ROWS.to_string(), pixels.rows.to_string());
    metadata.insert(keys::COLUMNS.to_string(), pixels.columns.to_string());

    if modality == Modality::CT {
        metadata
            .entry(keys::WINDOW_CENTER.to_string())
            .or_insert_with(|| DEFAULT_CT_WINDOW_CENTER.to_string());
        metadata
            .entry(keys::WINDOW_WIDTH.to_string())
            .or_insert_with(|| DEFAULT_CT_WINDOW_WIDTH.to_string());
    }

    Ok(AnalysisInput {
        object_id: object_id.to_string(),
        modality,
        pixels,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::{DataElement, PrimitiveValue, VR};
    use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
    use dimse::types::EXPLICIT_VR_LITTLE_ENDIAN;
    use dimse::StorageClass;

    fn image(modality: &str, window: Option<&str>) -> Vec<u8> {
        let mut object = InMemDicomObject::from_element_iter([
            DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(StorageClass::Ct.uid())),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.826.0.1.5")),
            DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("PAT-5")),
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from(modality)),
            DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
            DataElement::new(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, PrimitiveValue::from("MONOCHROME2")),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(2_u16)),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(2_u16)),
            DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(8_u16)),
            DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(8_u16)),
            DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(7_u16)),
            DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
            DataElement::new(tags::PIXEL_DATA, VR::OB, PrimitiveValue::from(vec![0_u8, 64, 128, 255])),
        ]);
        if let Some(window) = window {
            object.put(DataElement::new(tags::WINDOW_CENTER, VR::DS, PrimitiveValue::from(window)));
            object.put(DataElement::new(tags::WINDOW_WIDTH, VR::DS, PrimitiveValue::from("80")));
        }
        let file = object
            .with_meta(
                FileMetaTableBuilder::new()
                    .media_storage_sop_class_uid(StorageClass::Ct.uid())
                    .media_storage_sop_instance_uid("1.2.826.0.1.5")
                    .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN),
            )
            .unwrap();
        let mut buf = Vec::new();
        file.write_all(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_decode_ct_applies_default_window() {
        let input = decode_input("1.2.826.0.1.5", Modality::CT, &image("CT", None)).unwrap();

        assert_eq!(input.pixels.rows, 2);
        assert_eq!(input.pixels.columns, 2);
        assert_eq!(input.pixels.data, vec![0, 64, 128, 255]);
        assert_eq!(input.metadata[keys::WINDOW_CENTER], "40");
        assert_eq!(input.metadata[keys::WINDOW_WIDTH], "400");
        assert_eq!(input.metadata[keys::PATIENT_ID], "PAT-5");
        assert_eq!(input.metadata_f64(keys::ROWS), Some(2.0));
    }

    #[test]
    fn test_decode_keeps_first_window_value() {
        let input = decode_input("1.2.826.0.1.5", Modality::CT, &image("CT", Some("30\\50"))).unwrap();
        assert_eq!(input.metadata[keys::WINDOW_CENTER], "30");
        assert_eq!(input.metadata[keys::WINDOW_WIDTH], "80");
    }

    #[test]
    fn test_decode_mr_has_no_default_window() {
        let input = decode_input("1.2.826.0.1.5", Modality::MR, &image("MR", None)).unwrap();
        assert!(!input.metadata.contains_key(keys::WINDOW_CENTER));
    }

    #[test]
    fn test_decode_garbage_is_error() {
        assert!(matches!(
            decode_input("x", Modality::CT, b"garbage"),
            Err(DecodeError::Parse(_))
        ));
    }
}
