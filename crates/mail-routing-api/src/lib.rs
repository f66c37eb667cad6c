use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use mail_routing_core::{
    candidate_tie_breakers, inspect_mail, reason_registry, resolve_delivery, resolve_routing,
    rule_registry, status_registry, DeliveryExplanation, InspectError, MailInspection,
    MailRecord, ReasonInfo, RoutingExplanation, RuleInfo, StatusInfo,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExplainRequest {
    pub mail: MailRecord,
    pub viewer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Report<T> {
    pub report_id: String,
    pub mail_phid: String,
    pub viewer: String,
    pub tie_breakers: Vec<String>,
    pub data: T,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registry {
    pub statuses: &'static [StatusInfo],
    pub reasons: &'static [ReasonInfo],
    pub rules: &'static [RuleInfo],
}

/// Read a recorded mail snapshot from a JSON file.
///
/// # Errors
/// Returns an error when the file cannot be read or does not hold a mail snapshot.
pub fn load_mail(path: &Path) -> Result<MailRecord> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read mail snapshot {}", path.display()))?;
    let mail = MailRecord::from_json(&body)
        .with_context(|| format!("failed to parse mail snapshot {}", path.display()))?;
    tracing::debug!(path = %path.display(), mail_phid = %mail.phid, "loaded mail snapshot");
    Ok(mail)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MailRoutingApi;

impl MailRoutingApi {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Explain delivery of the requested mail to the requested viewer.
    ///
    /// # Errors
    /// Returns an error when the viewer is blank or the snapshot fails validation.
    pub fn explain_delivery(&self, request: &ExplainRequest) -> Result<Report<DeliveryExplanation>> {
        prepare(request)?;
        let delivery = resolve_delivery(&request.mail, &request.viewer);
        tracing::debug!(
            mail_phid = %request.mail.phid,
            status = delivery.status.as_str(),
            reasons = delivery.reasons.len(),
            "resolved delivery"
        );
        build_report(request, delivery)
    }

    /// Explain which routing rule governed delivery and list every matching candidate.
    ///
    /// # Errors
    /// Returns an error when the viewer is blank or the snapshot fails validation.
    pub fn explain_routing(&self, request: &ExplainRequest) -> Result<Report<RoutingExplanation>> {
        prepare(request)?;
        let routing = resolve_routing(&request.mail, &request.viewer);
        tracing::debug!(
            mail_phid = %request.mail.phid,
            recorded = request.mail.delivered_routing_rules.as_ref().map_or(0, Vec::len),
            matched = routing.candidates.len(),
            "resolved routing candidates"
        );
        build_report(request, routing)
    }

    /// Build the complete inspection view of the requested mail.
    ///
    /// # Errors
    /// Returns an error when the viewer is blank or the snapshot fails validation.
    pub fn inspect(&self, request: &ExplainRequest) -> Result<Report<MailInspection>> {
        prepare(request)?;
        build_report(request, inspect_mail(&request.mail, &request.viewer))
    }

    #[must_use]
    pub fn registry(&self) -> Registry {
        Registry {
            statuses: status_registry(),
            reasons: reason_registry(),
            rules: rule_registry(),
        }
    }
}

fn prepare(request: &ExplainRequest) -> Result<()> {
    if request.viewer.trim().is_empty() {
        return Err(InspectError::Query("viewer MUST be provided".to_string()).into());
    }
    request.mail.validate()?;

    for identifier in request.mail.unknown_identifiers() {
        tracing::warn!(
            mail_phid = %request.mail.phid,
            identifier = %identifier,
            "mail snapshot references an unrecognized identifier"
        );
    }
    Ok(())
}

fn build_report<T>(request: &ExplainRequest, data: T) -> Result<Report<T>>
where
    T: Serialize,
{
    let canonical = serde_json::to_string(&data).context("failed to serialize report data")?;
    Ok(Report {
        report_id: compute_report_id(&request.mail.phid, &request.viewer, &canonical),
        mail_phid: request.mail.phid.clone(),
        viewer: request.viewer.clone(),
        tie_breakers: candidate_tie_breakers(),
        data,
    })
}

fn compute_report_id(mail_phid: &str, viewer: &str, canonical: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [mail_phid, viewer, canonical] {
        hasher.update(part.as_bytes());
        hasher.update([0_u8]);
    }

    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    format!("rpt_{}", &digest_hex[..16])
}
