//! Axum server for the `/blockchain/*` compatibility surface.
//!
//! Mutating routes require the configured bearer key (constant-time compare);
//! read routes are open. Status endpoints are best-effort: a degraded store
//! reports `connected: false` instead of a 500.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, warn};

use bhoomi_ledger::{LedgerService, VerificationResult};
use bhoomi_sync::{RecordSource, SyncEngine};
use bhoomi_types::{BhoomiConfig, EventPayload, EventType, LedgerError, RowKey};

use crate::dto::{
    AddTimelineEntryBody, ApiResponse, BulkSyncBody, CreateRowBlockBody, EntryDto, LimitParams,
    PageParams, ScanParams, StatsParams, StatusData, VerifyRowParams,
};

/// Default and maximum row counts for listing endpoints.
const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// Shared state for HTTP handlers.
pub struct AppState {
    pub service: Arc<LedgerService>,
    pub source: Option<Arc<dyn RecordSource>>,
    pub config: BhoomiConfig,
    /// Server shutdown doubles as the bulk-sync cancellation signal.
    pub cancel: watch::Receiver<bool>,
}

type ApiError = (StatusCode, Json<ApiResponse<Value>>);
type ApiResult = Result<Json<ApiResponse<Value>>, ApiError>;

/// Build the router. Split out from `serve` so tests can bind their own
/// listener.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/blockchain/status", get(status_handler))
        .route("/blockchain/health", get(health_handler))
        .route("/blockchain/stats", get(stats_handler))
        .route("/blockchain/ledger/all", get(ledger_all_handler))
        .route("/blockchain/ledger/{*row_key}", get(ledger_chain_handler))
        .route("/blockchain/block/{block_id}", get(block_handler))
        .route("/blockchain/project-ledger/{project_id}", get(project_scan_handler))
        .route("/blockchain/verify/{*survey}", post(verify_survey_handler))
        .route("/blockchain/verify-integrity/{*survey}", get(verify_integrity_handler))
        .route("/blockchain/verify-landowner-row", get(verify_row_handler))
        .route("/blockchain/create-landowner-row-block", post(create_row_block_handler))
        .route("/blockchain/bulk-landowner-row-sync", post(bulk_sync_handler))
        .route("/blockchain/landowners-with-status", get(landowners_with_status_handler))
        .route("/blockchain/survey-complete-data/{*survey}", get(survey_data_handler))
        .route("/blockchain/survey-timeline/{*survey}", get(survey_timeline_handler))
        .route("/blockchain/search/{*survey}", get(search_handler))
        .route("/blockchain/add-timeline-entry", post(add_timeline_entry_handler))
        .with_state(state)
}

/// Start the HTTP server and run until the shutdown flag flips.
pub async fn serve(
    config: BhoomiConfig,
    service: Arc<LedgerService>,
    source: Option<Arc<dyn RecordSource>>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), LedgerError> {
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|e| LedgerError::Config(format!("invalid listen address {:?}: {e}", config.listen_addr)))?;

    let state = Arc::new(AppState {
        service,
        source,
        config,
        cancel: shutdown.clone(),
    });

    info!(addr = %addr, "starting ledger HTTP server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| LedgerError::Config(format!("failed to bind {addr}: {e}")))?;

    let mut shutdown = shutdown;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|&v| v).await;
        })
        .await
        .map_err(|e| LedgerError::Storage(format!("HTTP server error: {e}")))
}

/// Constant-time byte comparison to prevent timing side channels.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (&x, &y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Require the bearer key on mutating routes when one is configured.
fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if state.config.api_key.is_empty() {
        return Ok(());
    }

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let expected = format!("Bearer {}", state.config.api_key);
    if !constant_time_eq(auth.as_bytes(), expected.as_bytes()) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("invalid or missing API key")),
        ));
    }
    Ok(())
}

fn ok(data: impl Serialize) -> Json<ApiResponse<Value>> {
    // Our DTOs only contain JSON-representable fields.
    Json(ApiResponse::ok(serde_json::to_value(data).unwrap_or(Value::Null)))
}

fn fail(e: LedgerError) -> ApiError {
    let status = match &e {
        LedgerError::InvalidEntryInput(_) => StatusCode::BAD_REQUEST,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::DuplicateBlockId(_)
        | LedgerError::ChainViolation { .. }
        | LedgerError::ConcurrentModification(_) => StatusCode::CONFLICT,
        LedgerError::SourceUnavailable(_) => StatusCode::BAD_GATEWAY,
        LedgerError::Storage(_) | LedgerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut envelope = ApiResponse::error(e.to_string());
    // Clients may resubmit conflicts and source outages unchanged.
    envelope.data = Some(json!({ "retryable": e.is_retryable() }));
    (status, Json(envelope))
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

fn entry_dtos(entries: &[bhoomi_ledger::LedgerEntry]) -> Vec<EntryDto> {
    entries.iter().map(EntryDto::from).collect()
}

/// Resolve the live source row for a key, if a source is configured and
/// reachable. Source failures degrade to None rather than failing the
/// request.
async fn find_live_record(state: &AppState, row_key: &RowKey) -> Option<Value> {
    let source = state.source.as_ref()?;
    let candidates = match source.list_candidates(Some(&row_key.project_id)).await {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!(error = %e, "live row lookup failed, falling back to stored snapshot");
            return None;
        }
    };
    let canonical = row_key.canonical();
    candidates
        .into_iter()
        .find(|c| c.row_key.canonical() == canonical)
        .map(|c| c.record)
}

// ---------------------------------------------------------------------------
// Status and stats
// ---------------------------------------------------------------------------

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Value>> {
    let (connected, height) = match state.service.height() {
        Ok(height) => (true, height),
        Err(e) => {
            warn!(error = %e, "status probe failed, reporting disconnected");
            (false, 0)
        }
    };
    ok(StatusData {
        network: state.config.network_name.clone(),
        chain_id: state.config.chain_id,
        connected,
        block_number: height,
        // Vestigial field the dashboards still render.
        gas_price: "0".to_string(),
        is_initialized: connected,
    })
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Value>> {
    let connected = state.service.height().is_ok();
    let status = if connected { "ok" } else { "degraded" };
    ok(json!({ "status": status, "connected": connected }))
}

async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> ApiResult {
    let stats = state
        .service
        .compute_stats(params.project_id.as_deref())
        .map_err(fail)?;
    Ok(ok(stats))
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

async fn ledger_all_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> ApiResult {
    let entries = state
        .service
        .recent(clamp_limit(params.limit))
        .map_err(fail)?;
    Ok(ok(entry_dtos(&entries)))
}

async fn ledger_chain_handler(
    State(state): State<Arc<AppState>>,
    Path(raw_key): Path<String>,
) -> ApiResult {
    let row_key = RowKey::parse(&raw_key).map_err(fail)?;
    let chain = state.service.chain(&row_key).map_err(fail)?;
    Ok(ok(json!({
        "row_key": row_key.canonical(),
        "entries": entry_dtos(&chain),
    })))
}

async fn block_handler(
    State(state): State<Arc<AppState>>,
    Path(block_id): Path<String>,
) -> ApiResult {
    let entry = state
        .service
        .find_by_block_id(&block_id)
        .map_err(fail)?
        .ok_or_else(|| fail(LedgerError::NotFound(format!("block {block_id}"))))?;
    Ok(ok(EntryDto::from(&entry)))
}

async fn project_scan_handler(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Query(params): Query<ScanParams>,
) -> ApiResult {
    let page = state
        .service
        .scan_by_project(&project_id, clamp_limit(params.limit), params.after)
        .map_err(fail)?;
    Ok(ok(json!({
        "entries": entry_dtos(&page.entries),
        "next": page.next_token,
    })))
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

async fn verify_survey_handler(
    State(state): State<Arc<AppState>>,
    Path(survey): Path<String>,
) -> ApiResult {
    let result = state.service.verify_survey(&survey).map_err(fail)?;
    Ok(ok(result))
}

async fn verify_integrity_handler(
    State(state): State<Arc<AppState>>,
    Path(survey): Path<String>,
) -> ApiResult {
    let result = state.service.verify_survey(&survey).map_err(fail)?;
    Ok(ok(result))
}

async fn verify_row_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyRowParams>,
) -> ApiResult {
    let row_key = match params.row_key {
        Some(raw) => RowKey::parse(&raw).map_err(fail)?,
        None => RowKey::new(
            params.project_id.as_deref().unwrap_or_default(),
            params.new_survey_number.as_deref(),
            params.old_survey_number.as_deref(),
            params.cts_number.as_deref(),
            params.serial_number.as_deref(),
        )
        .map_err(fail)?,
    };

    let chain_result = state.service.verify(&row_key).map_err(fail)?;
    if chain_result.total_entries == 0 {
        return Ok(ok(json!({
            "exists_on_chain": false,
            "is_valid": false,
            "reason": "not_on_chain",
        })));
    }

    // Drift check against the live source row when reachable; otherwise the
    // stored snapshot is recomputed, which still surfaces v1/v2 hashes.
    let live_payload = match find_live_record(&state, &row_key).await {
        Some(record) => EventPayload::snapshot(bhoomi_sync::canonicalize_record(&record))
            .map_err(fail)?,
        None => {
            let latest = state
                .service
                .latest(&row_key)
                .map_err(fail)?
                .ok_or_else(|| fail(LedgerError::NotFound(row_key.canonical())))?;
            latest.payload
        }
    };
    let source_result = state
        .service
        .verify_against_source(&row_key, &live_payload)
        .map_err(fail)?;

    // Linkage breaks outrank drift in the reported reason.
    let reason = if chain_result.is_valid {
        source_result.reason
    } else {
        chain_result.reason
    };

    Ok(ok(json!({
        "exists_on_chain": true,
        "is_valid": chain_result.is_valid && source_result.is_valid,
        "reason": reason,
        "broken_at_index": chain_result.broken_at_index,
        "live_hash": source_result.live_hash,
        "legacy_live_hash": source_result.legacy_live_hash,
        "chain_hash": source_result.chain_hash,
        "block_id": source_result.block_id,
        "total_entries": chain_result.total_entries,
    })))
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

async fn create_row_block_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateRowBlockBody>,
) -> ApiResult {
    check_auth(&state, &headers)?;

    let row_key = RowKey::new(
        &body.project_id,
        body.new_survey_number.as_deref(),
        body.old_survey_number.as_deref(),
        body.cts_number.as_deref(),
        body.serial_number.as_deref(),
    )
    .map_err(fail)?;

    // Snapshot the live source row when available, else the identifiers
    // themselves so the chain still records the row's creation.
    let record = match find_live_record(&state, &row_key).await {
        Some(record) => bhoomi_sync::canonicalize_record(&record),
        None => json!({
            "project_id": row_key.project_id,
            "new_survey_number": row_key.new_survey_number,
            "old_survey_number": row_key.old_survey_number,
            "cts_number": row_key.cts_number,
            "serial_number": row_key.serial_number,
        }),
    };
    let payload = EventPayload::snapshot(record).map_err(fail)?;

    let entry = state
        .service
        .create_or_append(&row_key, payload, &body.officer_id, body.remarks)
        .map_err(fail)?;

    Ok(ok(json!({ "block_id": entry.block_id, "hash": entry.current_hash })))
}

async fn bulk_sync_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BulkSyncBody>,
) -> ApiResult {
    check_auth(&state, &headers)?;

    let source = state.source.as_ref().ok_or_else(|| {
        fail(LedgerError::SourceUnavailable(
            "no source-of-truth base URL configured".to_string(),
        ))
    })?;

    let candidates = source
        .list_candidates(body.project_id.as_deref())
        .await
        .map_err(fail)?;
    let total = candidates.len();

    let engine = SyncEngine::new(Arc::clone(&state.service), state.config.sync_concurrency);
    let report = engine
        .sync_missing(candidates, &body.officer_id, state.cancel.clone())
        .await;

    Ok(ok(json!({
        "processed": report.processed(),
        "total": total,
        "created": report.created,
        "skipped": report.skipped,
        "failed": report.failed,
        "results": report.outcomes,
    })))
}

async fn add_timeline_entry_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<AddTimelineEntryBody>,
) -> ApiResult {
    check_auth(&state, &headers)?;

    let event_type = EventType::from_wire_name(&body.action).map_err(fail)?;
    let entry = state
        .service
        .append_manual(
            &body.survey_number,
            event_type,
            body.metadata.unwrap_or_else(|| json!({})),
            &body.officer_id,
            body.previous_hash.as_deref(),
            body.data_hash.as_deref(),
            body.remarks,
        )
        .map_err(fail)?;

    Ok(ok(json!({ "block_id": entry.block_id, "hash": entry.current_hash })))
}

// ---------------------------------------------------------------------------
// Survey-scoped reads
// ---------------------------------------------------------------------------

async fn landowners_with_status_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> ApiResult {
    let source = state.source.as_ref().ok_or_else(|| {
        fail(LedgerError::SourceUnavailable(
            "no source-of-truth base URL configured".to_string(),
        ))
    })?;

    let mut candidates = source.list_candidates(None).await.map_err(fail)?;
    candidates.truncate(clamp_limit(params.limit));

    // Bulk re-verification refreshes each key's cached state without
    // serializing one chain walk at a time.
    let engine = SyncEngine::new(Arc::clone(&state.service), state.config.sync_concurrency);
    engine
        .verify_all(candidates.clone(), state.cancel.clone())
        .await;

    #[derive(Serialize)]
    struct RowStatus {
        row_key: String,
        survey_number: Option<String>,
        exists_on_chain: bool,
        status: bhoomi_ledger::ChainState,
    }

    let mut rows = Vec::new();
    for candidate in &candidates {
        let exists = state
            .service
            .exists_for_key(&candidate.row_key)
            .map_err(fail)?;
        let status = state.service.state_of(&candidate.row_key).map_err(fail)?;
        rows.push(RowStatus {
            survey_number: candidate.row_key.effective_survey().map(str::to_string),
            row_key: candidate.row_key.canonical(),
            exists_on_chain: exists,
            status,
        });
    }
    Ok(ok(rows))
}

async fn survey_data_handler(
    State(state): State<Arc<AppState>>,
    Path(survey): Path<String>,
) -> ApiResult {
    let latest = state
        .service
        .latest_for_survey(&survey)
        .map_err(fail)?
        .ok_or_else(|| fail(LedgerError::NotFound(format!("survey {survey} is not on chain"))))?;
    let entries = state.service.entries_for_survey(&survey).map_err(fail)?;
    let integrity = state.service.verify_survey(&survey).map_err(fail)?;

    Ok(ok(json!({
        "survey_number": survey,
        "latest": EntryDto::from(&latest),
        "chain_length": entries.len(),
        "integrity": integrity,
    })))
}

async fn survey_timeline_handler(
    State(state): State<Arc<AppState>>,
    Path(survey): Path<String>,
    Query(params): Query<PageParams>,
) -> ApiResult {
    let events = state
        .service
        .timeline_for_survey(&survey, params.offset.unwrap_or(0), clamp_limit(params.limit))
        .map_err(fail)?;
    Ok(ok(events))
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Path(survey): Path<String>,
) -> ApiResult {
    let latest = state.service.latest_for_survey(&survey).map_err(fail)?;
    let integrity: Option<VerificationResult> = match latest {
        Some(_) => Some(state.service.verify_survey(&survey).map_err(fail)?),
        None => None,
    };

    Ok(ok(json!({
        "exists_on_chain": latest.is_some(),
        "latest_entry": latest.as_ref().map(EntryDto::from),
        "integrity_summary": integrity,
    })))
}
