//! CRM sync for captured leads — HubSpot and/or a tenant webhook.
//!
//! Runs off the request path. Failures never surface to the visitor;
//! they set `crm_sync_status = failed` and log the detail with the lead
//! id so an operator can re-trigger from the admin portal.

use std::sync::Arc;

use uuid::Uuid;

use spark_domain::error::{Error, Result};
use spark_domain::types::CrmSyncStatus;
use spark_store::SparkStore;

const HUBSPOT_CONTACTS_URL: &str = "https://api.hubapi.com/crm/v3/objects/contacts";
const CRM_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Lead fields shipped to CRM targets.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LeadPayload {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub company_name: Option<String>,
    pub conversation_id: Option<Uuid>,
}

/// Split a full name into (first, last).
fn split_name(full_name: Option<&str>) -> (String, String) {
    let Some(full) = full_name.map(str::trim).filter(|s| !s.is_empty()) else {
        return (String::new(), String::new());
    };
    match full.split_once(char::is_whitespace) {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (full.to_string(), String::new()),
    }
}

fn hubspot_properties(lead: &LeadPayload) -> serde_json::Value {
    let (first, last) = split_name(lead.name.as_deref());
    let mut properties = serde_json::json!({
        "email": lead.email,
        "hs_lead_status": "NEW",
    });
    if !first.is_empty() {
        properties["firstname"] = serde_json::json!(first);
    }
    if !last.is_empty() {
        properties["lastname"] = serde_json::json!(last);
    }
    if let Some(company) = &lead.company_name {
        properties["company"] = serde_json::json!(company);
    }
    if let Some(phone) = &lead.phone {
        properties["phone"] = serde_json::json!(phone);
    }
    serde_json::json!({ "properties": properties })
}

/// Upsert a HubSpot contact keyed by email: create, and on a 409
/// conflict extract the existing id and patch it instead.
async fn hubspot_upsert_contact(
    http: &reqwest::Client,
    api_key: &str,
    lead: &LeadPayload,
) -> Result<()> {
    if lead.email.is_none() {
        tracing::warn!("HubSpot sync skipped: no email on lead");
        return Ok(());
    }

    let payload = hubspot_properties(lead);
    let resp = http
        .post(HUBSPOT_CONTACTS_URL)
        .bearer_auth(api_key)
        .json(&payload)
        .send()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;

    if resp.status() == reqwest::StatusCode::CONFLICT {
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let message = body["message"].as_str().unwrap_or("");
        let Some(contact_id) = extract_existing_id(message) else {
            return Err(Error::Other(
                "HubSpot 409 without an extractable existing id".into(),
            ));
        };

        let update = http
            .patch(format!("{HUBSPOT_CONTACTS_URL}/{contact_id}"))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !update.status().is_success() {
            return Err(Error::Http(format!(
                "HubSpot update returned {}",
                update.status()
            )));
        }
        tracing::info!(contact_id = %contact_id, "HubSpot contact updated");
        return Ok(());
    }

    if !resp.status().is_success() {
        return Err(Error::Http(format!(
            "HubSpot create returned {}",
            resp.status()
        )));
    }
    tracing::info!("HubSpot contact created");
    Ok(())
}

/// HubSpot's conflict body reads "... Existing ID: 12345".
fn extract_existing_id(message: &str) -> Option<String> {
    let (_, after) = message.split_once("Existing ID: ")?;
    let id = after.trim().trim_end_matches('.');
    (!id.is_empty()).then(|| id.to_string())
}

async fn webhook_post(http: &reqwest::Client, url: &str, lead: &LeadPayload) -> Result<()> {
    let resp = http
        .post(url)
        .json(lead)
        .send()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(Error::Http(format!(
            "webhook returned {}",
            resp.status()
        )));
    }
    tracing::info!(url = %url, "webhook POST delivered");
    Ok(())
}

/// Sync one lead to whatever CRM targets the tenant configured.
///
/// Intended for `tokio::spawn`: the outcome lands in
/// `crm_sync_status`, never in the HTTP response.
pub async fn sync_lead(
    store: Arc<dyn SparkStore>,
    client_id: Uuid,
    lead_id: Uuid,
    lead: LeadPayload,
) {
    let status = match run_sync(store.as_ref(), client_id, &lead).await {
        Ok(()) => CrmSyncStatus::Synced,
        Err(e) => {
            tracing::error!(lead_id = %lead_id, error = %e, "CRM sync failed");
            CrmSyncStatus::Failed
        }
    };

    if let Err(e) = store.set_lead_sync_status(lead_id, status.as_str()).await {
        tracing::error!(lead_id = %lead_id, error = %e, "crm_sync_status update failed");
    }
}

async fn run_sync(store: &dyn SparkStore, client_id: Uuid, lead: &LeadPayload) -> Result<()> {
    let client = store
        .client_by_id(client_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("client {client_id}")))?;

    let hubspot_key = client.settling_config.hubspot_api_key.as_deref();
    let webhook_url = client.settling_config.webhook_url.as_deref();

    if hubspot_key.is_none() && webhook_url.is_none() {
        // Nothing configured — nothing to do.
        return Ok(());
    }

    let http = reqwest::Client::builder()
        .timeout(CRM_TIMEOUT)
        .build()
        .map_err(|e| Error::Http(e.to_string()))?;

    let mut errors: Vec<String> = Vec::new();

    if let Some(key) = hubspot_key {
        if let Err(e) = hubspot_upsert_contact(&http, key, lead).await {
            errors.push(format!("HubSpot: {e}"));
        }
    }
    if let Some(url) = webhook_url {
        if let Err(e) = webhook_post(&http, url, lead).await {
            errors.push(format!("Webhook: {e}"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Other(errors.join("; ")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_name_variants() {
        assert_eq!(split_name(Some("Ada Lovelace")), ("Ada".into(), "Lovelace".into()));
        assert_eq!(split_name(Some("Prince")), ("Prince".into(), String::new()));
        assert_eq!(
            split_name(Some("Mary Jane Watson")),
            ("Mary".into(), "Jane Watson".into())
        );
        assert_eq!(split_name(None), (String::new(), String::new()));
        assert_eq!(split_name(Some("  ")), (String::new(), String::new()));
    }

    #[test]
    fn extract_existing_id_from_conflict_message() {
        assert_eq!(
            extract_existing_id("Contact already exists. Existing ID: 4217."),
            Some("4217".to_string())
        );
        assert_eq!(extract_existing_id("some other message"), None);
        assert_eq!(extract_existing_id("Existing ID: "), None);
    }

    #[test]
    fn hubspot_properties_include_only_present_fields() {
        let lead = LeadPayload {
            name: Some("Ada Lovelace".into()),
            email: Some("ada@example.com".into()),
            phone: None,
            ..Default::default()
        };
        let body = hubspot_properties(&lead);
        let props = &body["properties"];
        assert_eq!(props["email"], "ada@example.com");
        assert_eq!(props["firstname"], "Ada");
        assert_eq!(props["lastname"], "Lovelace");
        assert!(props.get("phone").is_none());
        assert!(props.get("company").is_none());
    }
}
