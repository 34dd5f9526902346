//! Service Class User (SCU) implementation for outbound DIMSE operations

use std::time::Duration;

use dicom_encoding::TransferSyntaxIndex;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use dicom_ul::association::client::ClientAssociationOptions;
use dicom_ul::pdu::{PDataValue, PDataValueType, Pdu};
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::config::{DimseConfig, RemoteNode};
use crate::message::{self, CommandSet};
use crate::types::{
    parse_part10, trim_uid, DatasetStream, StoreStatus, EXPLICIT_VR_LITTLE_ENDIAN,
    IMPLICIT_VR_LITTLE_ENDIAN,
};
use crate::{DimseError, Result};

/// DIMSE Service Class User
pub struct DimseScu {
    config: DimseConfig,
}

impl DimseScu {
    /// Create a new SCU with the given configuration
    pub fn new(config: DimseConfig) -> Self {
        Self { config }
    }

    /// Connection deadline for `node`, falling back to the local default
    pub fn connection_timeout(&self, node: &RemoteNode) -> Duration {
        node.connect_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.connect_timeout())
    }

    /// Send one object to a remote node over a fresh association
    ///
    /// Association setup and the transfer each get the connection deadline.
    /// A node that refuses or never answers the association surfaces as
    /// [`DimseError::AssociationRejected`]. A
    /// non-success response status is [`DimseError::StoreRejected`] and an
    /// expired transfer is [`DimseError::Timeout`].
    pub async fn store(&self, node: &RemoteNode, dataset: &DatasetStream) -> Result<()> {
        info!(
            "Sending C-STORE to {}@{}:{}",
            node.ae_title, node.host, node.port
        );

        node.validate()?;

        let bytes = dataset.to_bytes().await?;
        let timeout = self.connection_timeout(node);
        let node_owned = node.clone();
        let calling_aet = self.config.local_aet.clone();
        let max_pdu = self.config.max_pdu;
        let (established_tx, established_rx) = oneshot::channel();

        let exchange = tokio::task::spawn_blocking(move || {
            store_blocking(&calling_aet, max_pdu, &node_owned, &bytes, timeout, established_tx)
        });

        match tokio::time::timeout(timeout, established_rx).await {
            Ok(Ok(())) => {}
            // setup failed; the task carries the reason
            Ok(Err(_)) => return joined(exchange.await),
            Err(_) => {
                return Err(DimseError::AssociationRejected(format!(
                    "{} did not accept an association within {} ms",
                    node.descriptor(),
                    timeout.as_millis()
                )))
            }
        }

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => joined(result),
            Err(_) => Err(DimseError::Timeout(format!(
                "C-STORE to {} exceeded {} ms",
                node.descriptor(),
                timeout.as_millis()
            ))),
        }
    }
}

fn joined(result: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    result.map_err(|join| DimseError::internal(format!("C-STORE task failed: {}", join)))?
}

fn store_blocking(
    calling_aet: &str,
    max_pdu: u32,
    node: &RemoteNode,
    bytes: &[u8],
    timeout: Duration,
    established: oneshot::Sender<()>,
) -> Result<()> {
    let file = parse_part10(bytes)?;
    let sop_class = trim_uid(&file.meta().media_storage_sop_class_uid).to_string();
    let sop_instance = trim_uid(&file.meta().media_storage_sop_instance_uid).to_string();

    let mut association = ClientAssociationOptions::new()
        .calling_ae_title(calling_aet.to_string())
        .called_ae_title(node.ae_title.clone())
        .max_pdu_length(max_pdu)
        .read_timeout(timeout)
        .write_timeout(timeout)
        .with_presentation_context(
            sop_class.clone(),
            vec![EXPLICIT_VR_LITTLE_ENDIAN.to_string(), IMPLICIT_VR_LITTLE_ENDIAN.to_string()],
        )
        .establish((node.host.as_str(), node.port))
        .map_err(|e| DimseError::AssociationRejected(e.to_string()))?;
    let _ = established.send(());

    let negotiated = association
        .presentation_contexts()
        .first()
        .map(|pc| (pc.id, trim_uid(&pc.transfer_syntax).to_string()));
    let Some((context_id, ts_uid)) = negotiated else {
        let _ = association.abort();
        return Err(DimseError::AssociationRejected(format!(
            "no presentation context accepted for {}",
            sop_class
        )));
    };
    debug!("Negotiated context {} with transfer syntax {}", context_id, ts_uid);

    let ts = TransferSyntaxRegistry
        .get(&ts_uid)
        .ok_or_else(|| DimseError::transport(format!("unsupported transfer syntax {}", ts_uid)))?;

    let mut data = Vec::new();
    file.write_dataset_with_ts(&mut data, ts)
        .map_err(|e| DimseError::DicomObject(format!("failed to encode data set: {}", e)))?;

    let command = message::store_request(1, &sop_class, &sop_instance)?;
    association
        .send(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: context_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data: command,
            }],
        })
        .map_err(|e| DimseError::transport(e.to_string()))?;

    for fragment in message::data_fragments(context_id, &data) {
        association
            .send(&Pdu::PData { data: vec![fragment] })
            .map_err(|e| DimseError::transport(e.to_string()))?;
    }

    let status = match association.receive() {
        Ok(Pdu::PData { data }) => {
            let bytes: Vec<u8> = data
                .into_iter()
                .filter(|v| v.value_type == PDataValueType::Command)
                .flat_map(|v| v.data)
                .collect();
            CommandSet::parse(&bytes)?
                .status
                .ok_or_else(|| DimseError::transport("C-STORE-RSP without status"))?
        }
        Ok(Pdu::AbortRQ { .. }) => {
            return Err(DimseError::transport("association aborted by peer"));
        }
        Ok(other) => {
            return Err(DimseError::transport(format!("unexpected PDU: {:?}", other)));
        }
        Err(e) => return Err(DimseError::transport(e.to_string())),
    };

    if let Err(e) = association.release() {
        warn!("Failed to release association with {}: {}", node.descriptor(), e);
    }

    if StoreStatus::is_stored(status) {
        info!("C-STORE completed for {} (status 0x{:04X})", sop_instance, status);
        Ok(())
    } else {
        Err(DimseError::StoreRejected { status })
    }
}
