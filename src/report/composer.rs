use chrono::Utc;
use dimse::types::parse_part10;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    AnalysisResult, Finding, ForwardingState, IncomingObject, Report, ReportContent, ReportSection,
};
use crate::report::sr::{encode_basic_text_sr, new_uid};
use crate::report::CompositionError;
use crate::storage::StorageBackend;

const DISCLAIMER: &str = "This automated report does not replace human medical expertise.";

/// Builds reports and their SR documents
#[derive(Debug, Clone)]
pub struct ReportComposer {
    storage: Arc<dyn StorageBackend>,
}

impl ReportComposer {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Compose the report for `object` and write its SR document to storage
    pub async fn compose(
        &self,
        object: &IncomingObject,
        result: &AnalysisResult,
    ) -> Result<Report, CompositionError> {
        let content = compose_content(result);
        let report_id = Uuid::new_v4().to_string();
        let sr_instance_uid = new_uid();
        let generated_at = Utc::now();

        let source_bytes = self
            .storage
            .read_file_str(&object.storage_key)
            .await
            .map_err(|e| CompositionError::Source(e.to_string()))?;
        let source = parse_part10(&source_bytes).map_err(|e| CompositionError::Source(e.to_string()))?;

        let document = encode_basic_text_sr(
            Some(&*source),
            &object.patient_id,
            &sr_instance_uid,
            &content,
            generated_at,
        )?;

        let document_key = Report::document_key_for(&report_id);
        self.storage
            .write_file_str(&document_key, &document)
            .await
            .map_err(|e| CompositionError::Store(e.to_string()))?;

        tracing::info!(
            object_id = %object.id,
            report_id = %report_id,
            sections = content.sections.len(),
            "📝 Report composed"
        );

        Ok(Report {
            report_id,
            object_id: object.id.clone(),
            sr_instance_uid,
            content,
            generated_at,
            document_key,
            forwarding_state: ForwardingState::Pending,
            attempts: Vec::new(),
        })
    }

    /// Remove an SR document no committed report points to
    pub async fn discard(&self, object_id: &str, document_key: &str) {
        match self.storage.remove_str(document_key).await {
            Ok(true) => tracing::debug!(object_id, document_key, "Discarded report document"),
            Ok(false) => {}
            Err(e) => tracing::warn!(object_id, document_key, "Could not discard report document: {}", e),
        }
    }
}

/// Report text for an analysis result; the same input always gives the same text
pub fn compose_content(result: &AnalysisResult) -> ReportContent {
    ReportContent {
        summary: summary_text(result),
        sections: result
            .findings
            .iter()
            .enumerate()
            .map(|(i, finding)| ReportSection {
                title: format!("Finding {}: {}", i + 1, finding.finding_type),
                body: section_text(finding),
            })
            .collect(),
        conclusion: conclusion_text(result),
    }
}

fn percent(confidence: f64) -> String {
    format!("{:.2}%", confidence * 100.0)
}

fn summary_text(result: &AnalysisResult) -> String {
    if result.findings.is_empty() {
        return format!(
            "AI analysis of {} image completed. No significant abnormality detected.",
            result.modality
        );
    }

    let mut summary = format!(
        "AI analysis of {} image completed. {} finding(s) detected",
        result.modality,
        result.findings.len()
    );
    let high = result.high_severity_count();
    if high > 0 {
        summary.push_str(&format!(", including {} of high severity", high));
    }
    summary.push_str(&format!(
        ". Overall confidence: {}.",
        percent(result.overall_confidence)
    ));
    summary
}

fn section_text(finding: &Finding) -> String {
    let region = &finding.region;
    let mut text = format!(
        "{} Location: x={}, y={}, width={}, height={}. Severity: {}.",
        finding.description, region.x, region.y, region.width, region.height, finding.severity
    );
    if let Some(measurements) = finding.measurements.as_ref().filter(|m| !m.is_empty()) {
        let listed: Vec<String> = measurements
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect();
        text.push_str(&format!(" Measurements: {}.", listed.join(", ")));
    }
    text
}

fn conclusion_text(result: &AnalysisResult) -> String {
    if result.findings.is_empty() {
        return "Automated analysis found no significant abnormality. \
                Review by a radiologist is still recommended for validation."
            .to_string();
    }

    let lead = if result.high_severity_count() > 0 {
        "WARNING: findings of high severity were detected. \
         Urgent evaluation by a radiologist is strongly recommended."
    } else {
        "Findings were detected and require validation by a radiologist."
    };
    format!(
        "{} Overall system confidence: {}. {}",
        lead,
        percent(result.overall_confidence),
        DISCLAIMER
    )
}
