use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dicom_dictionary_std::tags;
use dimse::types::{parse_part10, string_attr};
use dimse::{
    DatasetMetadata, DatasetStream, DimseConfig, DimseScp, DimseScu, RemoteNode, StorageClass,
    StoreHandler, StoreRequest, StoreStatus,
};
use pacsai::config::Config;
use pacsai::forward::ReportTransport;
use pacsai::models::{ForwardingFailure, ObjectState};
use tokio_util::sync::CancellationToken;

#[path = "../pipeline/common.rs"]
mod common;
use common::{image, relay, rule_analyzer};

/// Stands in for the archive receiving reports
#[derive(Default)]
struct Archive {
    received: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl StoreHandler for Archive {
    async fn store(&self, request: StoreRequest) -> StoreStatus {
        match request.dataset.to_bytes().await {
            Ok(bytes) => {
                self.received.lock().unwrap().push(bytes.to_vec());
                StoreStatus::Success
            }
            Err(_) => StoreStatus::ProcessingFailure,
        }
    }
}

fn local(aet: &str, classes: Vec<StorageClass>) -> DimseConfig {
    DimseConfig {
        local_aet: aet.to_string(),
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        storage_classes: classes,
        ..Default::default()
    }
}

async fn serve(config: DimseConfig, handler: Arc<dyn StoreHandler>, shutdown: &CancellationToken) -> u16 {
    let bound = DimseScp::new(config, handler).bind().await.unwrap();
    let port = bound.local_addr().unwrap().port();
    tokio::spawn(bound.serve(shutdown.clone()));
    port
}

fn dataset(bytes: Vec<u8>) -> DatasetStream {
    let metadata = DatasetMetadata::from_object(&parse_part10(&bytes).unwrap());
    DatasetStream::from_bytes(Bytes::from(bytes), metadata)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn received_image_is_reported_to_archive() {
    let shutdown = CancellationToken::new();
    let archive = Arc::new(Archive::default());
    let archive_port = serve(
        local("PACS_INTERNE", vec![StorageClass::BasicTextSr]),
        archive.clone(),
        &shutdown,
    )
    .await;

    let mut config = Config::default();
    config.dimse = local("IA_SERVER", StorageClass::IMAGE_CLASSES.to_vec());
    config.destination = RemoteNode::new("PACS_INTERNE", "127.0.0.1", archive_port).with_timeout(5000);
    let transport: Arc<dyn ReportTransport> = Arc::new(DimseScu::new(config.dimse.clone()));
    let t = relay(config.clone(), rule_analyzer(0.93), transport);
    let relay_port = serve(config.dimse.clone(), t.assembly.handler.clone(), &shutdown).await;

    let modality = DimseScu::new(local("CT_SCANNER", StorageClass::IMAGE_CLASSES.to_vec()));
    let node = RemoteNode::new("IA_SERVER", "127.0.0.1", relay_port).with_timeout(5000);
    modality
        .store(&node, &dataset(image("1.2.826.0.1.3001", "CT", "PAT-LOOP")))
        .await
        .unwrap();

    assert_eq!(t.assembly.pipeline.shutdown(Duration::from_secs(10)).await, 0);
    shutdown.cancel();

    let status = t.assembly.relay.get_object_status("1.2.826.0.1.3001").unwrap().unwrap();
    assert_eq!(status.state, ObjectState::Forwarded);
    assert!(status.storage_released);

    let report = t.assembly.relay.get_report("1.2.826.0.1.3001").unwrap().unwrap();
    let received = archive.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let sr = parse_part10(&received[0]).unwrap();
    assert_eq!(
        string_attr(&sr, tags::SOP_CLASS_UID).as_deref(),
        Some(StorageClass::BasicTextSr.uid())
    );
    assert_eq!(string_attr(&sr, tags::SOP_INSTANCE_UID), Some(report.sr_instance_uid));
    assert_eq!(string_attr(&sr, tags::PATIENT_ID).as_deref(), Some("PAT-LOOP"));
    assert_eq!(string_attr(&sr, tags::STUDY_INSTANCE_UID).as_deref(), Some("1.2.826.0.1.200"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_archive_is_session_refused() {
    let shutdown = CancellationToken::new();

    // grab a free port and release it so nothing listens there
    let closed_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut config = Config::default();
    config.dimse = local("IA_SERVER", StorageClass::IMAGE_CLASSES.to_vec());
    config.destination = RemoteNode::new("PACS_INTERNE", "127.0.0.1", closed_port).with_timeout(2000);
    let transport: Arc<dyn ReportTransport> = Arc::new(DimseScu::new(config.dimse.clone()));
    let t = relay(config.clone(), rule_analyzer(0.93), transport);
    let relay_port = serve(config.dimse.clone(), t.assembly.handler.clone(), &shutdown).await;

    let modality = DimseScu::new(local("MR_SCANNER", StorageClass::IMAGE_CLASSES.to_vec()));
    let node = RemoteNode::new("IA_SERVER", "127.0.0.1", relay_port).with_timeout(5000);
    modality
        .store(&node, &dataset(image("1.2.826.0.1.3002", "MR", "PAT-LOOP")))
        .await
        .unwrap();

    t.assembly.pipeline.shutdown(Duration::from_secs(10)).await;
    shutdown.cancel();

    let status = t.assembly.relay.get_object_status("1.2.826.0.1.3002").unwrap().unwrap();
    assert_eq!(status.state, ObjectState::ReportGenerated);
    assert!(!status.storage_released);
    let report = t.assembly.relay.get_report("1.2.826.0.1.3002").unwrap().unwrap();
    assert_eq!(
        report.attempts[0].failure_kind(),
        Some(ForwardingFailure::SessionRefused)
    );
}
