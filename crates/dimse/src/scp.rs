//! Service Class Provider (SCP) implementation for inbound DIMSE operations
//!
//! The listener accepts associations on a tokio socket and runs each
//! association's upper-layer exchange on a blocking worker. Every completed
//! C-STORE is handed to a [`StoreHandler`] and answered with the status the
//! handler returns.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dicom_encoding::TransferSyntaxIndex;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use dicom_ul::association::server::ServerAssociationOptions;
use dicom_ul::pdu::{PDataValue, PDataValueType, Pdu};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, span, warn, Level};

use crate::config::DimseConfig;
use crate::message::{self, Assembled, CommandSet, MessageAssembler};
use crate::types::{trim_uid, DatasetMetadata, DatasetStream, StoreStatus, VERIFICATION_SOP_CLASS};
use crate::{DimseError, Result};

/// One C-STORE delivered by a remote node
#[derive(Debug)]
pub struct StoreRequest {
    /// AE title of the sending node
    pub calling_aet: String,
    /// The received object as a Part 10 file
    pub dataset: DatasetStream,
}

/// Receives objects accepted by the SCP
///
/// The returned status is sent back to the caller as the C-STORE-RSP status,
/// so implementations must answer without waiting on long-running work.
#[async_trait]
pub trait StoreHandler: Send + Sync {
    async fn store(&self, request: StoreRequest) -> StoreStatus;
}

/// DIMSE Service Class Provider
pub struct DimseScp {
    config: DimseConfig,
    handler: Arc<dyn StoreHandler>,
}

/// An SCP whose listening socket is bound but not yet serving
pub struct BoundScp {
    listener: TcpListener,
    scp: Arc<DimseScp>,
    sessions: Arc<Semaphore>,
}

impl DimseScp {
    /// Create a new SCP with the given configuration and store handler
    pub fn new(config: DimseConfig, handler: Arc<dyn StoreHandler>) -> Self {
        Self { config, handler }
    }

    pub fn config(&self) -> &DimseConfig {
        &self.config
    }

    /// Validate the configuration and bind the listening socket
    pub async fn bind(self) -> Result<BoundScp> {
        self.config.validate()?;

        let addr = SocketAddr::new(self.config.bind_addr, self.config.port);
        let listener = TcpListener::bind(addr).await?;
        let sessions = Arc::new(Semaphore::new(self.config.max_associations as usize));

        info!(
            "Starting DIMSE SCP on {} (AET: {})",
            listener.local_addr()?,
            self.config.local_aet
        );

        Ok(BoundScp {
            listener,
            scp: Arc::new(self),
            sessions,
        })
    }

    /// Bind and serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.bind().await?.serve(shutdown).await
    }

    /// Run one association to completion (blocking)
    fn handle_association(
        &self,
        stream: std::net::TcpStream,
        peer_addr: SocketAddr,
        runtime: &Handle,
    ) -> Result<()> {
        let timeout = self.config.association_timeout();
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let mut options = ServerAssociationOptions::new()
            .accept_any()
            .ae_title(self.config.local_aet.clone())
            .max_pdu_length(self.config.max_pdu);

        for ts in TransferSyntaxRegistry.iter() {
            if !ts.is_unsupported() {
                options = options.with_transfer_syntax(ts.uid());
            }
        }
        for class in &self.config.storage_classes {
            options = options.with_abstract_syntax(class.uid());
        }
        if self.config.enable_echo {
            options = options.with_abstract_syntax(VERIFICATION_SOP_CLASS);
        }

        // Proposals outside the configured classes are rejected per context;
        // the association itself goes ahead with whatever was accepted.
        let mut association = options
            .establish(stream)
            .map_err(|e| DimseError::AssociationRejected(e.to_string()))?;

        let calling_aet = association.client_ae_title().trim().to_string();
        info!("Association established with {} ({})", calling_aet, peer_addr);

        let mut assembler = MessageAssembler::new();
        let mut pending: Option<CommandSet> = None;

        loop {
            let pdu = match association.receive() {
                Ok(pdu) => pdu,
                Err(e) => {
                    info!("Association with {} ended: {}", peer_addr, e);
                    break;
                }
            };

            match pdu {
                Pdu::PData { data } => {
                    for value in data {
                        match assembler.push(value) {
                            None => {}
                            Some(Assembled::Command { context_id, bytes }) => {
                                let command = match CommandSet::parse(&bytes) {
                                    Ok(command) => command,
                                    Err(e) => {
                                        warn!("Discarding unreadable command from {}: {}", calling_aet, e);
                                        continue;
                                    }
                                };

                                match command.command_field {
                                    message::C_ECHO_RQ if self.config.enable_echo => {
                                        debug!("Processing C-ECHO request");
                                        let reply =
                                            message::echo_response(command.message_id.unwrap_or(0))?;
                                        association
                                            .send(&command_pdu(context_id, reply))
                                            .map_err(|e| DimseError::transport(e.to_string()))?;
                                    }
                                    message::C_STORE_RQ if command.has_data_set => {
                                        pending = Some(command);
                                    }
                                    other => {
                                        warn!("Unsupported DIMSE command 0x{:04X} from {}", other, calling_aet);
                                    }
                                }
                            }
                            Some(Assembled::DataSet { context_id, bytes }) => {
                                let Some(command) = pending.take() else {
                                    warn!("Data set without a preceding C-STORE-RQ from {}", calling_aet);
                                    continue;
                                };

                                let transfer_syntax = association
                                    .presentation_contexts()
                                    .iter()
                                    .find(|pc| pc.id == context_id)
                                    .map(|pc| pc.transfer_syntax.clone());

                                let status = self.dispatch_store(
                                    &command,
                                    transfer_syntax.as_deref(),
                                    &bytes,
                                    &calling_aet,
                                    runtime,
                                );

                                let reply = message::store_response(
                                    command.message_id.unwrap_or(0),
                                    command.affected_sop_class_uid.as_deref().unwrap_or_default(),
                                    command.affected_sop_instance_uid.as_deref().unwrap_or_default(),
                                    status.code(),
                                )?;
                                association
                                    .send(&command_pdu(context_id, reply))
                                    .map_err(|e| DimseError::transport(e.to_string()))?;
                            }
                        }
                    }
                }
                Pdu::ReleaseRQ => {
                    if let Err(e) = association.send(&Pdu::ReleaseRP) {
                        warn!("Failed to send release response to {}: {}", calling_aet, e);
                    }
                    info!("Released association with {}", calling_aet);
                    break;
                }
                Pdu::AbortRQ { .. } => {
                    warn!("Association aborted by {} ({})", calling_aet, peer_addr);
                    break;
                }
                other => {
                    debug!("Ignoring unexpected PDU from {}: {:?}", calling_aet, other);
                }
            }
        }

        Ok(())
    }

    /// Decode one C-STORE and pass it to the handler
    fn dispatch_store(
        &self,
        command: &CommandSet,
        transfer_syntax: Option<&str>,
        bytes: &[u8],
        calling_aet: &str,
        runtime: &Handle,
    ) -> StoreStatus {
        let sop_instance = command.affected_sop_instance_uid.as_deref().unwrap_or("<unknown>");
        let _span = span!(Level::DEBUG, "c_store", sop_instance_uid = %sop_instance).entered();

        let sop_class = command.affected_sop_class_uid.as_deref().unwrap_or_default();
        if !self.config.accepts_sop_class(sop_class) {
            let err = DimseError::UnsupportedSopClass(sop_class.to_string());
            warn!("Rejecting C-STORE from {}: {}", calling_aet, err);
            return StoreStatus::ProcessingFailure;
        }

        let dataset = match decode_store_payload(bytes, transfer_syntax, command, calling_aet) {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!("Rejecting C-STORE from {}: {}", calling_aet, e);
                return StoreStatus::ProcessingFailure;
            }
        };

        runtime.block_on(self.handler.store(StoreRequest {
            calling_aet: calling_aet.to_string(),
            dataset,
        }))
    }
}

impl BoundScp {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept associations until `shutdown` is cancelled
    ///
    /// Associations already running are left to finish on their own.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("DIMSE SCP '{}' stopped accepting associations", self.scp.config.local_aet);
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!("Accepted connection from {}", peer_addr);

                        let Ok(permit) = Arc::clone(&self.sessions).try_acquire_owned() else {
                            warn!(
                                "Maximum associations reached, rejecting connection from {}",
                                peer_addr
                            );
                            drop(stream);
                            continue;
                        };

                        let stream = match stream.into_std().and_then(|s| {
                            s.set_nonblocking(false)?;
                            Ok(s)
                        }) {
                            Ok(stream) => stream,
                            Err(e) => {
                                error!("Could not prepare connection from {}: {}", peer_addr, e);
                                continue;
                            }
                        };

                        let scp = Arc::clone(&self.scp);
                        let runtime = Handle::current();
                        tokio::task::spawn_blocking(move || {
                            let _permit = permit;
                            if let Err(e) = scp.handle_association(stream, peer_addr, &runtime) {
                                error!("Error handling association from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                    }
                }
            }
        }

        Ok(())
    }
}

fn command_pdu(context_id: u8, data: Vec<u8>) -> Pdu {
    Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: context_id,
            value_type: PDataValueType::Command,
            is_last: true,
            data,
        }],
    }
}

/// Turn a received data set into a Part 10 file with its identifying metadata
pub fn decode_store_payload(
    bytes: &[u8],
    transfer_syntax: Option<&str>,
    command: &CommandSet,
    calling_aet: &str,
) -> Result<DatasetStream> {
    let ts_uid = transfer_syntax
        .map(trim_uid)
        .ok_or_else(|| DimseError::DicomParsing("unknown presentation context".to_string()))?;
    let ts = TransferSyntaxRegistry
        .get(ts_uid)
        .ok_or_else(|| DimseError::DicomParsing(format!("unsupported transfer syntax {}", ts_uid)))?;

    let object = InMemDicomObject::read_dataset_with_ts(bytes, ts)
        .map_err(|e| DimseError::DicomParsing(format!("failed to read data set: {}", e)))?;

    let mut metadata = DatasetMetadata::from_object(&object);
    metadata.transfer_syntax = Some(ts_uid.to_string());
    metadata.calling_aet = Some(calling_aet.to_string());

    let sop_class = metadata
        .sop_class_uid
        .clone()
        .or_else(|| command.affected_sop_class_uid.clone())
        .ok_or_else(|| DimseError::DicomParsing("missing SOP Class UID".to_string()))?;
    let sop_instance = metadata
        .sop_instance_uid
        .clone()
        .or_else(|| command.affected_sop_instance_uid.clone())
        .ok_or_else(|| DimseError::DicomParsing("missing SOP Instance UID".to_string()))?;

    let file = object
        .with_meta(
            FileMetaTableBuilder::new()
                .media_storage_sop_class_uid(sop_class)
                .media_storage_sop_instance_uid(sop_instance)
                .transfer_syntax(ts_uid),
        )
        .map_err(|e| DimseError::DicomObject(format!("failed to build file meta: {}", e)))?;

    let mut buf = Vec::with_capacity(bytes.len() + 512);
    file.write_all(&mut buf)
        .map_err(|e| DimseError::DicomObject(format!("failed to encode file: {}", e)))?;
    metadata.size_bytes = Some(buf.len() as u64);

    Ok(DatasetStream::from_bytes(Bytes::from(buf), metadata))
}
