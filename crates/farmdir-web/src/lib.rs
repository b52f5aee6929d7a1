//! HTTP surface: CRM webhook, read API and connection diagnostics.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, RawQuery, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
    Json, Router,
};
use farmdir_core::normalize::{non_blank, value_to_text};
use farmdir_core::ExternalId;
use farmdir_crm::{CrmError, CrmSource};
use farmdir_storage::{
    clamp_limit, ListingFilter, ListingStore, DEFAULT_LIST_LIMIT, DEFAULT_SEARCH_LIMIT,
    MAX_LIST_LIMIT, MAX_SEARCH_LIMIT,
};
use farmdir_sync::{AppConfig, Notifier, SyncService};
use serde_json::{json, Map, Value as JsonValue};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "farmdir-web";

const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";
const MIN_SEARCH_CHARS: usize = 2;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ListingStore>,
    pub crm: Arc<dyn CrmSource>,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ListingStore>,
        crm: Arc<dyn CrmSource>,
    ) -> Result<Self, CrmError> {
        let notifier = Notifier::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            store,
            crm,
            notifier,
        })
    }

    fn sync_service(&self) -> SyncService {
        SyncService::new(Arc::clone(&self.store), Arc::clone(&self.crm))
    }
}

type SharedState = Arc<AppState>;

fn webhook_routes() -> MethodRouter<SharedState> {
    get(webhook_probe_handler)
        .post(webhook_handler)
        .fallback(method_not_allowed)
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/webhook", webhook_routes())
        .route("/api/zoho-webhook", webhook_routes())
        .route("/api/listings", get(listings_handler).fallback(method_not_allowed))
        .route("/api/locations", get(locations_handler).fallback(method_not_allowed))
        .route("/api/search", get(search_handler).fallback(method_not_allowed))
        .route(
            "/api/debug-connection",
            get(debug_connection_handler).fallback(method_not_allowed),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    if state.config.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET is not set; every webhook POST will be rejected with 401");
    }
    if !state.config.zoho.has_credentials() {
        warn!(
            missing = %state.config.zoho.missing_credentials().join(", "),
            "CRM credentials incomplete; webhook syncs will fail"
        );
    }
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.web_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
        .into_response()
}

async fn webhook_probe_handler(uri: Uri) -> Response {
    Json(json!({ "ok": true, "route": uri.path(), "mode": "sync" })).into_response()
}

fn query_pairs(raw: Option<&str>) -> Vec<(String, String)> {
    raw.map(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .into_owned()
            .collect::<Vec<_>>()
    })
    .unwrap_or_default()
}

fn query_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn is_authorized(secret: Option<&str>, headers: &HeaderMap, query: &[(String, String)]) -> bool {
    let Some(secret) = secret else {
        return false;
    };
    let header_token = headers
        .get(WEBHOOK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    let query_token = query_value(query, "token");
    header_token == Some(secret) || query_token == Some(secret)
}

fn parse_json_body(content_type: &str, body: &[u8]) -> Option<JsonValue> {
    if !content_type.contains("application/json") {
        return None;
    }
    serde_json::from_slice(body).ok()
}

fn parse_form_body(content_type: &str, body: &[u8]) -> Option<JsonValue> {
    if !content_type.contains("application/x-www-form-urlencoded") {
        return None;
    }
    let map = url::form_urlencoded::parse(body)
        .into_owned()
        .map(|(k, v)| (k, JsonValue::String(v)))
        .collect::<Map<_, _>>();
    Some(JsonValue::Object(map))
}

fn parse_raw_json(body: &[u8]) -> Option<JsonValue> {
    serde_json::from_slice(body).ok()
}

/// JSON, then form, then best-effort JSON of the raw text, then an empty object.
fn parse_payload(content_type: &str, body: &[u8]) -> JsonValue {
    let content_type = content_type.to_ascii_lowercase();
    parse_json_body(&content_type, body)
        .or_else(|| parse_form_body(&content_type, body))
        .or_else(|| parse_raw_json(body))
        .unwrap_or_else(|| JsonValue::Object(Map::new()))
}

fn text_id(value: Option<&JsonValue>) -> Option<String> {
    value
        .and_then(value_to_text)
        .and_then(|s| non_blank(Some(s.as_str())))
}

/// `data[0].id`, then `id`, then the `id` query parameter.
fn extract_record_id(payload: &JsonValue, query: &[(String, String)]) -> Option<String> {
    text_id(payload.pointer("/data/0/id"))
        .or_else(|| text_id(payload.get("id")))
        .or_else(|| non_blank(query_value(query, "id")))
}

async fn webhook_handler(
    State(state): State<SharedState>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let query = query_pairs(raw_query.as_deref());
    if !is_authorized(state.config.webhook_secret.as_deref(), &headers, &query) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response();
    }
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            return (
                rejection.status(),
                Json(json!({ "error": "BadRequest", "message": rejection.body_text() })),
            )
                .into_response();
        }
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let payload = parse_payload(content_type, &body);

    let Some(external_id) = extract_record_id(&payload, &query).as_deref().and_then(ExternalId::parse) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Missing CRM record id",
                "hint": "send { id } or { data: [{ id }] } in the body, or ?id=...",
            })),
        )
            .into_response();
    };

    let span = info_span!("webhook", external_id = %external_id);
    async move {
        match state.sync_service().sync_record(&external_id).await {
            Ok(report) => {
                let notified = state.notifier.notify(&report.storage_id).await;
                Json(json!({
                    "ok": true,
                    "id": report.storage_id,
                    "crmId": report.crm_id,
                    "syncStatus": report.status,
                    "slug": report.slug,
                    "rebuild": notified.rebuild,
                    "dispatch": notified.dispatch,
                }))
                .into_response()
            }
            Err(err) => {
                warn!(error = %err, "webhook sync failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "ok": false,
                        "error": err.category(),
                        "message": err.to_string(),
                        "id": external_id.storage_id(),
                        "crmId": external_id.crm_id(),
                    })),
                )
                    .into_response()
            }
        }
    }
    .instrument(span)
    .await
}

fn parse_limit(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|v| v.trim().parse().ok())
}

fn degraded(err: impl std::fmt::Display) -> Response {
    warn!(error = %err, "read api storage failure");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "results": [],
            "count": 0,
            "error": "StorageError",
            "message": err.to_string(),
        })),
    )
        .into_response()
}

async fn listings_handler(
    State(state): State<SharedState>,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let query = query_pairs(raw_query.as_deref());
    let filter = ListingFilter {
        region: non_blank(query_value(&query, "region")),
        city: non_blank(query_value(&query, "city")),
        category: non_blank(query_value(&query, "category")),
        limit: clamp_limit(parse_limit(query_value(&query, "limit")), DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT),
    };

    match state.store.list_listings(&filter).await {
        Ok(results) => Json(json!({
            "count": results.len(),
            "results": results,
            "filters": {
                "region": filter.region,
                "city": filter.city,
                "category": filter.category,
                "limit": filter.limit,
            },
        }))
        .into_response(),
        Err(err) => degraded(err),
    }
}

async fn locations_handler(
    State(state): State<SharedState>,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let query = query_pairs(raw_query.as_deref());
    let region = non_blank(query_value(&query, "region"));
    match state.store.location_counts(region.as_deref()).await {
        Ok(results) => Json(json!({ "count": results.len(), "results": results })).into_response(),
        Err(err) => degraded(err),
    }
}

async fn search_handler(
    State(state): State<SharedState>,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let query = query_pairs(raw_query.as_deref());
    let q = query_value(&query, "q").map(str::trim).unwrap_or_default().to_string();
    if q.chars().count() < MIN_SEARCH_CHARS {
        return Json(json!({ "results": [], "count": 0, "query": q })).into_response();
    }

    let limit = clamp_limit(
        parse_limit(query_value(&query, "limit")),
        DEFAULT_SEARCH_LIMIT,
        MAX_SEARCH_LIMIT,
    );
    match state.store.search_listings(&q, limit).await {
        Ok(results) => Json(json!({ "count": results.len(), "results": results, "query": q })).into_response(),
        Err(err) => degraded(err),
    }
}

fn preview(value: Option<&str>) -> Option<String> {
    value.map(|v| {
        let head = v.chars().take(4).collect::<String>();
        format!("{head}...")
    })
}

fn check(result: Result<(), String>) -> JsonValue {
    match result {
        Ok(()) => json!({ "ok": true }),
        Err(error) => json!({ "ok": false, "error": error }),
    }
}

async fn debug_connection_handler(State(state): State<SharedState>) -> Response {
    let config = &state.config;
    let zoho = &config.zoho;

    let database = state.store.ping().await.map_err(|e| e.to_string());
    let crm = state.crm.access_token().await.map(|_| ()).map_err(|e| e.to_string());
    let ok = database.is_ok() && crm.is_ok();

    Json(json!({
        "ok": ok,
        "config": {
            "zohoRefreshToken": zoho.refresh_token.is_some(),
            "zohoClientId": zoho.client_id.is_some(),
            "zohoClientSecret": zoho.client_secret.is_some(),
            "zohoClientIdPreview": preview(zoho.client_id.as_deref()),
            "zohoRegion": config.zoho_region,
            "zohoAccountsUrl": zoho.accounts_url,
            "zohoApiUrl": zoho.api_url,
            "zohoModule": zoho.module,
            "webhookSecret": config.webhook_secret.is_some(),
            "rebuildHook": config.rebuild_hook_url.is_some(),
            "ciDispatch": config.dispatch.is_some(),
        },
        "checks": {
            "database": check(database),
            "crm": check(crm),
        },
    }))
    .into_response()
}
