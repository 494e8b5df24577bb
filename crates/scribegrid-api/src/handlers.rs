//! REST API handlers for plain document CRUD.
//!
//! Users, payments, servers, dumps, and the healthcheck. Each handler
//! reads/writes via `StateStore` and returns JSON responses.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use scribegrid_scheduler::epoch_secs;
use scribegrid_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    /// Failure that still carries a payload.
    pub(crate) fn failed_with(data: T, msg: &str) -> Json<Self> {
        Json(Self {
            success: false,
            data: Some(data),
            error: Some(msg.to_string()),
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Map a store error onto a status code.
fn state_error(e: StateError) -> Response {
    let status = match &e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::Conflict(_) => StatusCode::CONFLICT,
        _ => {
            error!(error = %e, "store operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status).into_response()
}

fn bad_request(msg: &str) -> Response {
    error_response(msg, StatusCode::BAD_REQUEST).into_response()
}

/// `None` for absent or blank strings.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Parse a `YYYY-MM-DD` query value into the epoch second starting that day (UTC).
fn parse_day(value: &str, param: &str) -> Result<u64, String> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("invalid {param} date format, expected YYYY-MM-DD"))?;
    let secs = date.and_time(NaiveTime::MIN).and_utc().timestamp();
    Ok(secs.max(0) as u64)
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthcheck
pub async fn healthcheck(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.ping() {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => {
            error!(error = %e, "healthcheck failed");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable").into_response()
        }
    }
}

// ── Users ──────────────────────────────────────────────────────

/// Filters and paging for the user list.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UserQuery {
    /// Case-insensitive substring of the username.
    pub username: Option<String>,
    /// Case-insensitive substring of the email.
    pub email: Option<String>,
    /// `YYYY-MM-DD`, inclusive.
    pub created_after: Option<String>,
    /// `YYYY-MM-DD`, inclusive of the day's first second.
    pub created_before: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// GET /api/v1/users
pub async fn list_users(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> impl IntoResponse {
    let after = match query.created_after.as_deref().map(|v| parse_day(v, "created_after")) {
        Some(Err(msg)) => return bad_request(&msg),
        Some(Ok(secs)) => Some(secs),
        None => None,
    };
    let before = match query.created_before.as_deref().map(|v| parse_day(v, "created_before")) {
        Some(Err(msg)) => return bad_request(&msg),
        Some(Ok(secs)) => Some(secs),
        None => None,
    };
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(10);
    if page == 0 {
        return bad_request("invalid page parameter");
    }
    if page_size == 0 {
        return bad_request("invalid page_size parameter");
    }

    let users = match state.store.list_users() {
        Ok(users) => users,
        Err(e) => return state_error(e),
    };
    let page_items: Vec<User> = users
        .into_iter()
        .filter(|u| query.username.as_deref().is_none_or(|q| contains_ci(&u.username, q)))
        .filter(|u| query.email.as_deref().is_none_or(|q| contains_ci(&u.email, q)))
        .filter(|u| after.is_none_or(|t| u.created_at >= t))
        .filter(|u| before.is_none_or(|t| u.created_at <= t))
        .skip((page - 1).saturating_mul(page_size) as usize)
        .take(page_size as usize)
        .collect();
    ApiResponse::ok(page_items).into_response()
}

/// GET /api/v1/users/{id}
pub async fn get_user(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_user(&id) {
        Ok(Some(user)) => ApiResponse::ok(user).into_response(),
        Ok(None) => error_response("user not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_error(e),
    }
}

/// Create user request body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub permissions: String,
}

/// POST /api/v1/users
pub async fn create_user(
    State(state): State<ApiState>,
    Json(req): Json<CreateUserRequest>,
) -> impl IntoResponse {
    if req.username.trim().is_empty() || req.email.trim().is_empty() || req.password_hash.is_empty() {
        return bad_request("username, email and password_hash are required");
    }
    let now = epoch_secs();
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: req.username,
        email: req.email,
        password_hash: req.password_hash,
        permissions: if req.permissions.trim().is_empty() {
            "user".to_string()
        } else {
            req.permissions
        },
        created_at: now,
        updated_at: now,
        ..User::default()
    };
    match state.store.put_user(&user) {
        Ok(()) => {
            info!(user_id = %user.id, "user created");
            (StatusCode::CREATED, ApiResponse::ok(user)).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// Replace user request body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReplaceUserRequest {
    pub username: String,
    pub email: String,
    pub permissions: String,
}

/// PUT /api/v1/users/{id}
pub async fn replace_user(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ReplaceUserRequest>,
) -> impl IntoResponse {
    if req.username.is_empty() && req.email.is_empty() && req.permissions.is_empty() {
        return bad_request("no fields to update");
    }
    let patch = UserPatch {
        username: Some(req.username),
        email: Some(req.email),
        permissions: Some(req.permissions),
        ..UserPatch::default()
    };
    match state.store.patch_user(&id, &patch) {
        Ok(user) => ApiResponse::ok(user).into_response(),
        Err(e) => state_error(e),
    }
}

/// PATCH /api/v1/users/{id}
///
/// Only non-empty fields are applied.
pub async fn patch_user(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<UserPatch>,
) -> impl IntoResponse {
    let patch = UserPatch {
        username: non_empty(req.username),
        email: non_empty(req.email),
        permissions: non_empty(req.permissions),
        payments: req.payments.filter(|p| !p.is_empty()),
        jobs: req.jobs.filter(|j| !j.is_empty()),
    };
    if patch.is_empty() {
        return bad_request("no fields to update");
    }
    match state.store.patch_user(&id, &patch) {
        Ok(user) => ApiResponse::ok(user).into_response(),
        Err(e) => state_error(e),
    }
}

/// DELETE /api/v1/users/{id}
pub async fn delete_user(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_user(&id) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("user not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_error(e),
    }
}

// ── Payments ───────────────────────────────────────────────────

/// Add payment request body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PaymentRequest {
    pub price: String,
    pub payment_method: String,
    pub payment_status: String,
    pub job_id: String,
}

/// POST /api/v1/users/{id}/payments
pub async fn add_payment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<PaymentRequest>,
) -> impl IntoResponse {
    let now = epoch_secs();
    let payment = Payment {
        id: Uuid::new_v4().to_string(),
        price: req.price,
        payment_method: req.payment_method,
        payment_status: req.payment_status,
        job_id: req.job_id,
        created_at: now,
        updated_at: now,
    };
    match state.store.push_payment(&id, &payment) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(payment)).into_response(),
        Err(e) => state_error(e),
    }
}

/// DELETE /api/v1/users/{id}/payments/{payment_id}
pub async fn delete_payment(
    State(state): State<ApiState>,
    Path((id, payment_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.pull_payment(&id, &payment_id) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("payment not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_error(e),
    }
}

// ── Servers ────────────────────────────────────────────────────

/// Filters for the server list.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerQuery {
    /// Exact status match.
    pub status: Option<String>,
    /// Case-insensitive substring of the CPU descriptor.
    pub cpu: Option<String>,
    /// Case-insensitive substring of the GPU descriptor.
    pub gpu: Option<String>,
    /// Minimum RAM in GB.
    pub ram: Option<u32>,
}

/// GET /api/v1/servers
pub async fn list_servers(
    State(state): State<ApiState>,
    Query(query): Query<ServerQuery>,
) -> impl IntoResponse {
    match state.store.list_servers() {
        Ok(servers) => {
            let matching: Vec<Server> = servers
                .into_iter()
                .filter(|s| query.status.as_deref().is_none_or(|q| s.status == q))
                .filter(|s| query.cpu.as_deref().is_none_or(|q| contains_ci(&s.cpu_info, q)))
                .filter(|s| query.gpu.as_deref().is_none_or(|q| contains_ci(&s.gpu_info, q)))
                .filter(|s| query.ram.is_none_or(|min| s.ram_size_gb >= min))
                .collect();
            ApiResponse::ok(matching).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/servers/{id}
pub async fn get_server(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_server(&id) {
        Ok(Some(server)) => ApiResponse::ok(server).into_response(),
        Ok(None) => error_response("server not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_error(e),
    }
}

/// Create/replace server request body. Job lists are never taken from clients.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerRequest {
    pub hostname: String,
    pub address: String,
    pub description: String,
    pub status: String,
    pub cpu_info: String,
    pub gpu_info: String,
    pub ram_size_gb: u32,
}

impl ServerRequest {
    fn validate(&self) -> Result<(), &'static str> {
        if self.hostname.trim().is_empty() || self.address.trim().is_empty() {
            return Err("hostname and address are required");
        }
        Ok(())
    }

    fn status_or_default(&self) -> String {
        if self.status.trim().is_empty() {
            ACTIVE_STATUS.to_string()
        } else {
            self.status.clone()
        }
    }
}

/// POST /api/v1/servers
pub async fn create_server(
    State(state): State<ApiState>,
    Json(req): Json<ServerRequest>,
) -> impl IntoResponse {
    if let Err(msg) = req.validate() {
        return bad_request(msg);
    }
    let now = epoch_secs();
    let server = Server {
        id: Uuid::new_v4().to_string(),
        status: req.status_or_default(),
        hostname: req.hostname,
        address: req.address,
        description: req.description,
        cpu_info: req.cpu_info,
        gpu_info: req.gpu_info,
        ram_size_gb: req.ram_size_gb,
        created_at: now,
        updated_at: now,
        ..Server::default()
    };
    match state.store.put_server(&server) {
        Ok(()) => {
            info!(server_id = %server.id, hostname = %server.hostname, "server registered");
            (StatusCode::CREATED, ApiResponse::ok(server)).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// PUT /api/v1/servers/{id}
pub async fn replace_server(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ServerRequest>,
) -> impl IntoResponse {
    if let Err(msg) = req.validate() {
        return bad_request(msg);
    }
    let patch = ServerPatch {
        status: Some(req.status_or_default()),
        hostname: Some(req.hostname),
        address: Some(req.address),
        description: Some(req.description),
        cpu_info: Some(req.cpu_info),
        gpu_info: Some(req.gpu_info),
        ram_size_gb: Some(req.ram_size_gb),
    };
    match state.store.patch_server(&id, &patch) {
        Ok(server) => ApiResponse::ok(server).into_response(),
        Err(e) => state_error(e),
    }
}

/// PATCH /api/v1/servers/{id}
///
/// Only non-empty fields are applied.
pub async fn patch_server(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ServerPatch>,
) -> impl IntoResponse {
    let patch = ServerPatch {
        hostname: non_empty(req.hostname),
        address: non_empty(req.address),
        description: non_empty(req.description),
        status: non_empty(req.status),
        cpu_info: non_empty(req.cpu_info),
        gpu_info: non_empty(req.gpu_info),
        ram_size_gb: req.ram_size_gb.filter(|gb| *gb > 0),
    };
    if patch.is_empty() {
        return bad_request("no fields to update");
    }
    match state.store.patch_server(&id, &patch) {
        Ok(server) => ApiResponse::ok(server).into_response(),
        Err(e) => state_error(e),
    }
}

/// DELETE /api/v1/servers/{id}
///
/// Refused with 409 while the server still lists any job.
pub async fn delete_server(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let server = match state.store.get_server(&id) {
        Ok(Some(server)) => server,
        Ok(None) => return error_response("server not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => return state_error(e),
    };
    if !server.current_jobs.is_empty() || !server.completed_jobs.is_empty() {
        return error_response(
            "cannot delete server with associated jobs",
            StatusCode::CONFLICT,
        )
        .into_response();
    }
    match state.store.delete_server(&id) {
        Ok(true) => {
            info!(server_id = %id, "server deleted");
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => error_response("server not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/servers/{id}/current_jobs
pub async fn server_current_jobs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    resolve_server_jobs(&state, &id, |s| &s.current_jobs)
}

/// GET /api/v1/servers/{id}/completed_jobs
pub async fn server_completed_jobs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    resolve_server_jobs(&state, &id, |s| &s.completed_jobs)
}

fn resolve_server_jobs(
    state: &ApiState,
    server_id: &str,
    list: impl Fn(&Server) -> &Vec<JobId>,
) -> Response {
    let server = match state.store.get_server(server_id) {
        Ok(Some(server)) => server,
        Ok(None) => return error_response("server not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => return state_error(e),
    };
    match state.store.get_jobs(list(&server)) {
        Ok(jobs) => ApiResponse::ok(jobs).into_response(),
        Err(e) => state_error(e),
    }
}

// ── Dump ───────────────────────────────────────────────────────

/// GET /api/v1/dump/export
pub async fn export_dump(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.export_snapshot() {
        Ok(snapshot) => ApiResponse::ok(snapshot).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/dump/import
pub async fn import_dump(
    State(state): State<ApiState>,
    Json(snapshot): Json<Snapshot>,
) -> impl IntoResponse {
    match state.store.import_snapshot(&snapshot) {
        Ok(()) => {
            info!(
                users = snapshot.users.len(),
                servers = snapshot.servers.len(),
                jobs = snapshot.jobs.len(),
                "dump imported"
            );
            ApiResponse::ok(serde_json::json!({
                "users": snapshot.users.len(),
                "servers": snapshot.servers.len(),
                "jobs": snapshot.jobs.len(),
            }))
            .into_response()
        }
        Err(e) => state_error(e),
    }
}
