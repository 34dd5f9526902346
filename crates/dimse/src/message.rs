//! DIMSE command sets and P-DATA reassembly
//!
//! Command sets are always encoded in Implicit VR Little Endian (PS3.7 §6.3.1).

use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use dicom_ul::pdu::{PDataValue, PDataValueType};

use crate::types::string_attr;
use crate::{DimseError, Result};

/// C-STORE-RQ command field
pub const C_STORE_RQ: u16 = 0x0001;
/// C-STORE-RSP command field
pub const C_STORE_RSP: u16 = 0x8001;
/// C-ECHO-RQ command field
pub const C_ECHO_RQ: u16 = 0x0030;
/// C-ECHO-RSP command field
pub const C_ECHO_RSP: u16 = 0x8030;

/// Command Data Set Type value meaning "no data set follows"
const NO_DATA_SET: u16 = 0x0101;
/// Command Data Set Type value used when a data set follows
const DATA_SET_PRESENT: u16 = 0x0000;
/// Priority MEDIUM
const PRIORITY_MEDIUM: u16 = 0x0000;

/// The fields of a DIMSE command set this crate cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSet {
    pub command_field: u16,
    pub message_id: Option<u16>,
    pub message_id_responded_to: Option<u16>,
    pub affected_sop_class_uid: Option<String>,
    pub affected_sop_instance_uid: Option<String>,
    pub status: Option<u16>,
    pub has_data_set: bool,
}

impl CommandSet {
    /// Parse an encoded command set
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let ts = IMPLICIT_VR_LITTLE_ENDIAN.erased();
        let obj = InMemDicomObject::read_dataset_with_ts(bytes, &ts)
            .map_err(|e| DimseError::DicomParsing(format!("invalid command set: {}", e)))?;

        let command_field = uint16(&obj, tags::COMMAND_FIELD)
            .ok_or_else(|| DimseError::DicomParsing("missing Command Field".to_string()))?;
        let data_set_type = uint16(&obj, tags::COMMAND_DATA_SET_TYPE).unwrap_or(NO_DATA_SET);

        Ok(Self {
            command_field,
            message_id: uint16(&obj, tags::MESSAGE_ID),
            message_id_responded_to: uint16(&obj, tags::MESSAGE_ID_BEING_RESPONDED_TO),
            affected_sop_class_uid: string_attr(&obj, tags::AFFECTED_SOP_CLASS_UID),
            affected_sop_instance_uid: string_attr(&obj, tags::AFFECTED_SOP_INSTANCE_UID),
            status: uint16(&obj, tags::STATUS),
            has_data_set: data_set_type != NO_DATA_SET,
        })
    }
}

fn uint16(obj: &InMemDicomObject, tag: dicom_core::Tag) -> Option<u16> {
    obj.element(tag).ok().and_then(|e| e.to_int::<u16>().ok())
}

fn encode(obj: InMemDicomObject) -> Result<Vec<u8>> {
    let ts = IMPLICIT_VR_LITTLE_ENDIAN.erased();
    let mut buf = Vec::with_capacity(128);
    obj.write_dataset_with_ts(&mut buf, &ts)
        .map_err(|e| DimseError::DicomObject(format!("could not encode command set: {}", e)))?;
    Ok(buf)
}

/// Encode a C-STORE-RQ
pub fn store_request(message_id: u16, sop_class_uid: &str, sop_instance_uid: &str) -> Result<Vec<u8>> {
    encode(InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, PrimitiveValue::from(sop_class_uid)),
        DataElement::new(tags::COMMAND_FIELD, VR::US, PrimitiveValue::from(C_STORE_RQ)),
        DataElement::new(tags::MESSAGE_ID, VR::US, PrimitiveValue::from(message_id)),
        DataElement::new(tags::PRIORITY, VR::US, PrimitiveValue::from(PRIORITY_MEDIUM)),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, PrimitiveValue::from(DATA_SET_PRESENT)),
        DataElement::new(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_instance_uid)),
    ]))
}

/// Encode a C-STORE-RSP
pub fn store_response(
    message_id: u16,
    sop_class_uid: &str,
    sop_instance_uid: &str,
    status: u16,
) -> Result<Vec<u8>> {
    encode(InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, PrimitiveValue::from(sop_class_uid)),
        DataElement::new(tags::COMMAND_FIELD, VR::US, PrimitiveValue::from(C_STORE_RSP)),
        DataElement::new(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, PrimitiveValue::from(message_id)),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, PrimitiveValue::from(NO_DATA_SET)),
        DataElement::new(tags::STATUS, VR::US, PrimitiveValue::from(status)),
        DataElement::new(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_instance_uid)),
    ]))
}

/// Encode a C-ECHO-RSP
pub fn echo_response(message_id: u16) -> Result<Vec<u8>> {
    encode(InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(crate::types::VERIFICATION_SOP_CLASS),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, PrimitiveValue::from(C_ECHO_RSP)),
        DataElement::new(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, PrimitiveValue::from(message_id)),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, PrimitiveValue::from(NO_DATA_SET)),
        DataElement::new(tags::STATUS, VR::US, PrimitiveValue::from(0x0000_u16)),
    ]))
}

/// A complete message fragment stream, reassembled from P-DATA values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    /// A full command set
    Command { context_id: u8, bytes: Vec<u8> },
    /// A full data set
    DataSet { context_id: u8, bytes: Vec<u8> },
}

/// Collects PDV fragments until the last fragment of a command or data set arrives
#[derive(Debug, Default)]
pub struct MessageAssembler {
    command: Vec<u8>,
    data: Vec<u8>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one PDV; returns a message once its last fragment has been seen
    pub fn push(&mut self, value: PDataValue) -> Option<Assembled> {
        let PDataValue {
            presentation_context_id,
            value_type,
            is_last,
            mut data,
        } = value;

        match value_type {
            PDataValueType::Command => {
                self.command.append(&mut data);
                is_last.then(|| Assembled::Command {
                    context_id: presentation_context_id,
                    bytes: std::mem::take(&mut self.command),
                })
            }
            PDataValueType::Data => {
                self.data.append(&mut data);
                is_last.then(|| Assembled::DataSet {
                    context_id: presentation_context_id,
                    bytes: std::mem::take(&mut self.data),
                })
            }
        }
    }
}

/// Split an encoded data set into P-DATA values that fit a 16 KiB PDU
pub fn data_fragments(context_id: u8, data: &[u8]) -> Vec<PDataValue> {
    const MAX_FRAGMENT: usize = 16_000;

    if data.is_empty() {
        return vec![PDataValue {
            presentation_context_id: context_id,
            value_type: PDataValueType::Data,
            is_last: true,
            data: Vec::new(),
        }];
    }

    let count = data.len().div_ceil(MAX_FRAGMENT);
    data.chunks(MAX_FRAGMENT)
        .enumerate()
        .map(|(i, chunk)| PDataValue {
            presentation_context_id: context_id,
            value_type: PDataValueType::Data,
            is_last: i + 1 == count,
            data: chunk.to_vec(),
        })
        .collect()
}
