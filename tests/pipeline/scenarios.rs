use pacsai::config::Config;
use pacsai::models::{ForwardingFailure, ForwardingState, ObjectState, Severity};
use pacsai::pipeline::CleanupOutcome;
use pacsai::service::ResendError;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{image, relay, rule_analyzer, store_request, ScriptedTransport};

const SETTLE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn high_severity_mammography_is_urgent() {
    let transport = Arc::new(ScriptedTransport::default());
    let t = relay(Config::default(), rule_analyzer(0.95), transport.clone());

    t.assembly
        .handler
        .ingest(store_request(image("1.2.826.0.1.1001", "MG", "PAT-A")))
        .await
        .unwrap();
    t.assembly.pipeline.shutdown(SETTLE).await;

    let report = t.assembly.relay.get_report("1.2.826.0.1.1001").unwrap().unwrap();
    assert_eq!(report.content.sections.len(), 1);
    assert_eq!(report.content.sections[0].title, "Finding 1: microcalcifications");
    assert!(report.content.conclusion.contains("Urgent evaluation by a radiologist is strongly recommended"));
    assert!(report.content.summary.contains("including 1 of high severity"));

    let record = t.registry.get("1.2.826.0.1.1001").unwrap().unwrap();
    assert_eq!(record.analysis.unwrap().findings[0].severity, Severity::High);
}

#[tokio::test]
async fn zero_findings_recommend_routine_validation() {
    let transport = Arc::new(ScriptedTransport::default());
    let t = relay(Config::default(), rule_analyzer(0.1), transport);

    t.assembly
        .handler
        .ingest(store_request(image("1.2.826.0.1.1002", "CT", "PAT-B")))
        .await
        .unwrap();
    t.assembly.pipeline.shutdown(SETTLE).await;

    let report = t.assembly.relay.get_report("1.2.826.0.1.1002").unwrap().unwrap();
    assert!(report.content.sections.is_empty());
    assert!(report.content.summary.contains("No significant abnormality detected"));
    assert!(report.content.conclusion.contains("Review by a radiologist is still recommended for validation"));

    let analysis = t.registry.get("1.2.826.0.1.1002").unwrap().unwrap().analysis.unwrap();
    assert_eq!(analysis.overall_confidence, 0.0);
}

#[tokio::test]
async fn refused_session_keeps_report_and_payload() {
    let transport = Arc::new(ScriptedTransport::failing(ForwardingFailure::SessionRefused));
    let t = relay(Config::default(), rule_analyzer(0.85), transport.clone());

    t.assembly
        .handler
        .ingest(store_request(image("1.2.826.0.1.1003", "CT", "PAT-C")))
        .await
        .unwrap();
    t.assembly.pipeline.shutdown(SETTLE).await;

    let status = t.assembly.relay.get_object_status("1.2.826.0.1.1003").unwrap().unwrap();
    assert_eq!(status.state, ObjectState::ReportGenerated);
    assert!(!status.storage_released);
    assert!(t.storage.exists_str("incoming/1.2.826.0.1.1003.dcm"));

    let report = t.assembly.relay.get_report("1.2.826.0.1.1003").unwrap().unwrap();
    assert_eq!(report.forwarding_state, ForwardingState::Failed);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].failure_kind(), Some(ForwardingFailure::SessionRefused));
    assert_eq!(report.attempts[0].destination, "PACS_INTERNE@localhost:11111");
}

#[tokio::test]
async fn resend_after_refusal_finishes_object() {
    let transport = Arc::new(ScriptedTransport::failing(ForwardingFailure::TransportFailure));
    let t = relay(Config::default(), rule_analyzer(0.85), transport.clone());
    let id = "1.2.826.0.1.1004";

    t.assembly.handler.ingest(store_request(image(id, "DX", "PAT-D"))).await.unwrap();
    t.assembly.pipeline.shutdown(SETTLE).await;

    transport.set_failure(None);
    let attempt = t.assembly.relay.resend_report(id).await.unwrap();
    assert!(attempt.is_success());

    let status = t.assembly.relay.get_object_status(id).unwrap().unwrap();
    assert_eq!(status.state, ObjectState::Forwarded);
    assert!(status.storage_released);
    assert!(!t.storage.exists_str(&format!("incoming/{}.dcm", id)));

    let report = t.assembly.relay.get_report(id).unwrap().unwrap();
    assert_eq!(report.attempts.len(), 2);
    assert_eq!(report.forwarding_state, ForwardingState::Forwarded);
    // the SR document stays available after cleanup
    assert!(t.storage.exists_str(&report.document_key));
}

#[tokio::test]
async fn resend_of_forwarded_report_appends_attempt() {
    let transport = Arc::new(ScriptedTransport::default());
    let t = relay(Config::default(), rule_analyzer(0.85), transport.clone());
    let id = "1.2.826.0.1.1005";

    t.assembly.handler.ingest(store_request(image(id, "MR", "PAT-E"))).await.unwrap();
    t.assembly.pipeline.shutdown(SETTLE).await;
    assert_eq!(
        t.assembly.relay.get_object_status(id).unwrap().unwrap().state,
        ObjectState::Forwarded
    );

    let attempt = t.assembly.relay.resend_report(id).await.unwrap();
    assert!(attempt.is_success());

    let status = t.assembly.relay.get_object_status(id).unwrap().unwrap();
    assert_eq!(status.state, ObjectState::Forwarded);
    let report = t.assembly.relay.get_report(id).unwrap().unwrap();
    assert_eq!(report.attempts.len(), 2);
    assert!(report.attempts.iter().all(|a| a.is_success()));

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].1, report.sr_instance_uid);
    assert_eq!(sent[1].1, report.sr_instance_uid);
}

#[tokio::test]
async fn resend_is_refused_for_failed_and_unknown_objects() {
    let transport = Arc::new(ScriptedTransport::default());
    let t = relay(Config::default(), Arc::new(common::StuckAnalyzer), transport);

    assert!(matches!(
        t.assembly.relay.resend_report("9.9.9").await,
        Err(ResendError::NotFound(_))
    ));

    let id = "1.2.826.0.1.1006";
    t.assembly.handler.ingest(store_request(image(id, "CT", "PAT-F"))).await.unwrap();
    assert!(matches!(
        t.assembly.relay.resend_report(id).await,
        Err(ResendError::NotEligible { .. })
    ));
}

#[tokio::test]
async fn cleanup_twice_is_harmless() {
    let transport = Arc::new(ScriptedTransport::default());
    let t = relay(Config::default(), rule_analyzer(0.85), transport);
    let id = "1.2.826.0.1.1007";

    t.assembly.handler.ingest(store_request(image(id, "CT", "PAT-G"))).await.unwrap();
    t.assembly.pipeline.shutdown(SETTLE).await;

    let generation = t.registry.get(id).unwrap().unwrap().object.generation;
    let cleanup = &t.assembly.context.cleanup;
    assert_eq!(cleanup.release(id, generation).await.unwrap(), CleanupOutcome::AlreadyReleased);
    assert_eq!(cleanup.release(id, generation).await.unwrap(), CleanupOutcome::AlreadyReleased);
    assert!(!t.storage.exists_str(&format!("incoming/{}.dcm", id)));
}
