use dimse::StoreHandler;
use dimse::StoreStatus;
use pacsai::config::{Backpressure, Config};
use pacsai::models::{Modality, ObjectState};
use pacsai::state::{ObjectRegistry, RedbRecordStore};
use pacsai::storage::{FilesystemStorage, StorageBackend};
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{image, relay, rule_analyzer, store_request, ScriptedTransport, StuckAnalyzer};

#[tokio::test]
async fn accepted_transfer_creates_one_received_object() {
    let t = relay(
        Config::default(),
        Arc::new(StuckAnalyzer),
        Arc::new(ScriptedTransport::default()),
    );

    let status = t
        .assembly
        .handler
        .store(store_request(image("1.2.826.0.1.2001", "CT", "PAT-1")))
        .await;
    assert_eq!(status, StoreStatus::Success);

    let objects = t.assembly.relay.list_recent_objects(10, 0).unwrap();
    assert_eq!(objects.len(), 1);
    let object = &objects[0];
    assert_eq!(object.id, "1.2.826.0.1.2001");
    assert_eq!(object.modality, Modality::CT);
    assert_eq!(object.patient_id, "PAT-1");
    assert_eq!(object.study_instance_uid.as_deref(), Some("1.2.826.0.1.200"));
    assert!(matches!(object.state, ObjectState::Received | ObjectState::Analyzing));
    assert!(t.storage.exists_str(&object.storage_key));
}

#[tokio::test]
async fn transfer_without_mandatory_metadata_is_refused() {
    let t = relay(
        Config::default(),
        Arc::new(StuckAnalyzer),
        Arc::new(ScriptedTransport::default()),
    );

    for missing in ["sop", "modality", "patient"] {
        let mut request = store_request(image("1.2.826.0.1.2002", "CT", "PAT-2"));
        let metadata = request.dataset.metadata_mut();
        match missing {
            "sop" => metadata.sop_instance_uid = None,
            "modality" => metadata.modality = None,
            _ => metadata.patient_id = None,
        }
        assert_eq!(t.assembly.handler.store(request).await, StoreStatus::ProcessingFailure);
    }

    assert!(t.assembly.relay.list_recent_objects(10, 0).unwrap().is_empty());
    assert!(!t.storage.exists_str("incoming/1.2.826.0.1.2002.dcm"));
}

#[tokio::test]
async fn every_modality_reaches_forwarded() {
    let transport = Arc::new(ScriptedTransport::default());
    let t = relay(Config::default(), rule_analyzer(0.97), transport.clone());

    let cases = [
        ("1.2.826.0.1.2010", "CT", "pulmonary_nodule"),
        ("1.2.826.0.1.2011", "MR", "brain_lesion"),
        ("1.2.826.0.1.2012", "DX", "pulmonary_opacity"),
        ("1.2.826.0.1.2013", "MG", "microcalcifications"),
    ];
    for (id, modality, _) in cases {
        t.assembly.handler.ingest(store_request(image(id, modality, "PAT-3"))).await.unwrap();
    }
    assert_eq!(t.assembly.pipeline.shutdown(Duration::from_secs(10)).await, 0);

    for (id, _, finding) in cases {
        let record = t.registry.get(id).unwrap().unwrap();
        assert_eq!(record.object.state, ObjectState::Forwarded, "{}", id);
        assert!(record.object.storage_released);
        let analysis = record.analysis.unwrap();
        assert_eq!(analysis.findings[0].finding_type, finding);
        assert!((0.0..=1.0).contains(&analysis.overall_confidence));
    }
    assert_eq!(transport.sent().len(), 4);

    let recent = t.assembly.relay.list_recent_objects(2, 1).unwrap();
    assert_eq!(recent.len(), 2);
}

#[tokio::test]
async fn reject_policy_fails_excess_objects() {
    let mut config = Config::default();
    config.pipeline.max_concurrent_analyses = 1;
    config.pipeline.backpressure = Backpressure::Reject;
    config.pipeline.analysis_timeout_ms = 0;
    let t = relay(config, Arc::new(StuckAnalyzer), Arc::new(ScriptedTransport::default()));

    let first = t
        .assembly
        .handler
        .store(store_request(image("1.2.826.0.1.2020", "CT", "PAT-4")))
        .await;
    let second = t
        .assembly
        .handler
        .store(store_request(image("1.2.826.0.1.2021", "CT", "PAT-4")))
        .await;
    assert_eq!(first, StoreStatus::Success);
    assert_eq!(second, StoreStatus::ProcessingFailure);

    let refused = t.assembly.relay.get_object_status("1.2.826.0.1.2021").unwrap().unwrap();
    assert_eq!(refused.state, ObjectState::Failed);
    assert!(refused.storage_released);

    assert_eq!(t.assembly.pipeline.shutdown(Duration::from_millis(50)).await, 1);
}

#[tokio::test]
async fn analysis_deadline_fails_object() {
    let mut config = Config::default();
    config.pipeline.analysis_timeout_ms = 30;
    let t = relay(config, Arc::new(StuckAnalyzer), Arc::new(ScriptedTransport::default()));

    t.assembly
        .handler
        .ingest(store_request(image("1.2.826.0.1.2030", "MR", "PAT-5")))
        .await
        .unwrap();
    assert_eq!(t.assembly.pipeline.shutdown(Duration::from_secs(5)).await, 0);

    let status = t.assembly.relay.get_object_status("1.2.826.0.1.2030").unwrap().unwrap();
    assert_eq!(status.state, ObjectState::Failed);
    assert!(status.failure.unwrap().contains("deadline"));
    assert!(t.assembly.relay.get_report("1.2.826.0.1.2030").unwrap().is_none());
}

#[tokio::test]
async fn lifecycle_survives_on_redb() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state.redb");
    let id = "1.2.826.0.1.2040";

    {
        let storage: Arc<dyn StorageBackend> =
            Arc::new(FilesystemStorage::new(dir.path().join("storage")).unwrap());
        let registry = ObjectRegistry::new(Arc::new(RedbRecordStore::open(&db).unwrap()));
        let assembly = pacsai::assemble(
            &Config::default(),
            registry,
            storage,
            rule_analyzer(0.9),
            Arc::new(ScriptedTransport::default()),
        );
        assembly.handler.ingest(store_request(image(id, "CT", "PAT-6"))).await.unwrap();
        assembly.pipeline.shutdown(Duration::from_secs(5)).await;
    }

    let registry = ObjectRegistry::new(Arc::new(RedbRecordStore::open(&db).unwrap()));
    let record = registry.get(id).unwrap().unwrap();
    assert_eq!(record.object.state, ObjectState::Forwarded);
    assert_eq!(record.report.unwrap().attempts.len(), 1);
}
