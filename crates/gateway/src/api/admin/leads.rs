//! Admin lead management and CSV export.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use spark_domain::types::{Lead, LeadStatus};
use spark_store::SparkStore;

use crate::api::admin::guard::authenticate_admin;
use crate::api::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "d_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn d_limit() -> u32 {
    50
}

// ── GET /spark/admin/leads ──────────────────────────────────────────

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;

    let limit = query.limit.min(200);
    let leads = state.store.list_leads(client.id, limit, query.offset).await?;

    Ok(Json(serde_json::json!({
        "items": leads,
        "limit": limit,
        "offset": query.offset,
    })))
}

// ── PATCH /spark/admin/leads/:id ────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LeadUpdate {
    #[serde(default)]
    pub status: Option<LeadStatus>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(lead_id): Path<Uuid>,
    Json(body): Json<LeadUpdate>,
) -> Result<Json<Lead>, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;

    let mut patch = serde_json::Map::new();
    if let Some(status) = body.status {
        patch.insert("status".into(), serde_json::json!(status));
    }
    if let Some(notes) = body.notes {
        patch.insert("notes".into(), serde_json::json!(notes));
    }
    if patch.is_empty() {
        return Err(ApiError::Validation("Nothing to update".into()));
    }
    patch.insert(
        "updated_at".into(),
        serde_json::json!(chrono::Utc::now().to_rfc3339()),
    );

    let lead = state
        .store
        .update_lead(client.id, lead_id, serde_json::Value::Object(patch))
        .await?;
    Ok(Json(lead))
}

// ── GET /spark/admin/leads/export ───────────────────────────────────

pub async fn export_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let client = authenticate_admin(&state, &headers).await?;

    // Export is bounded like the metrics scans.
    let leads = state.store.list_leads(client.id, 10_000, 0).await?;

    let mut csv = String::from("name,email,phone,status,crm_sync_status,notes,created_at\n");
    for lead in &leads {
        let created_at = lead
            .created_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        let row = [
            lead.name.as_deref().unwrap_or(""),
            lead.email.as_deref().unwrap_or(""),
            lead.phone.as_deref().unwrap_or(""),
            status_str(lead.status),
            lead.crm_sync_status.as_str(),
            lead.notes.as_deref().unwrap_or(""),
            created_at.as_str(),
        ];
        let cells: Vec<String> = row.iter().map(|cell| csv_cell(cell)).collect();
        csv.push_str(&cells.join(","));
        csv.push('\n');
    }

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"leads.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

fn status_str(status: LeadStatus) -> &'static str {
    match status {
        LeadStatus::New => "new",
        LeadStatus::Contacted => "contacted",
        LeadStatus::Converted => "converted",
        LeadStatus::Lost => "lost",
    }
}

/// Encode one CSV cell.
///
/// Cells whose first character could start a spreadsheet formula
/// (`=`, `+`, `-`, `@`, tab, CR) are prefixed with a single quote so
/// exports can't smuggle formulas into a spreadsheet.
fn csv_cell(raw: &str) -> String {
    let guarded = match raw.chars().next() {
        Some('=') | Some('+') | Some('-') | Some('@') | Some('\t') | Some('\r') => {
            format!("'{raw}")
        }
        _ => raw.to_string(),
    };

    if guarded.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", guarded.replace('"', "\"\""))
    } else {
        guarded
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_starts_get_quoted() {
        assert_eq!(csv_cell("=SUM(A1:A9)"), "'=SUM(A1:A9)");
        assert_eq!(csv_cell("+1234"), "'+1234");
        assert_eq!(csv_cell("-2"), "'-2");
        assert_eq!(csv_cell("@handle"), "'@handle");
        assert_eq!(csv_cell("\tx"), "'\tx");
    }

    #[test]
    fn plain_cells_untouched() {
        assert_eq!(csv_cell("Ada Lovelace"), "Ada Lovelace");
        assert_eq!(csv_cell("ada@example.com"), "ada@example.com");
        assert_eq!(csv_cell(""), "");
    }

    #[test]
    fn separator_characters_force_quoting() {
        assert_eq!(csv_cell("a,b"), "\"a,b\"");
        assert_eq!(csv_cell("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_cell("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn formula_guard_applies_before_quoting() {
        // A formula that also contains a comma: guard first, quote second.
        assert_eq!(csv_cell("=1,2"), "\"'=1,2\"");
    }

    #[test]
    fn lead_status_serde_accepts_known_values() {
        let update: LeadUpdate =
            serde_json::from_str(r#"{"status": "contacted"}"#).unwrap();
        assert_eq!(update.status, Some(LeadStatus::Contacted));
        assert!(serde_json::from_str::<LeadUpdate>(r#"{"status": "bogus"}"#).is_err());
    }
}
