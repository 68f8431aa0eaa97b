use axum::{
	Json, Router,
	extract::{Path, Query, State},
	http::{HeaderMap, StatusCode, header},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;
use sift_service::{
	DocumentMetadata, Error as ServiceError, RebuildReport, ReconcileReport, ReembedReport,
	RegisterTableRequest, RetrieveRequest, RetrieveResponse, RunDetail, RunListPage,
	RunListRequest, SubmitDocumentRequest, SubmitOutcome, TableQueryRequest, TableQueryResponse,
	TableReport,
};

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/ingest/document", post(ingest_document))
		.route("/v1/ingest/table", post(ingest_table))
		.route("/v1/retrieve", post(retrieve))
		.route("/v1/table/query", post(query_table))
		.route("/v1/runs", get(list_runs))
		.route("/v1/runs/{id}", get(run_detail))
		.route("/v1/admin/reembed", post(reembed))
		.route("/v1/admin/rebuild", post(rebuild))
		.route("/v1/admin/reconcile", post(reconcile))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct IngestDocumentRequest {
	tenant_id: String,
	source_ref: String,
	/// Normalized document text as produced by the connector layer.
	content: String,
	metadata: DocumentMetadata,
}

async fn ingest_document(
	State(state): State<AppState>,
	Json(payload): Json<IngestDocumentRequest>,
) -> Result<Json<SubmitOutcome>, ApiError> {
	let request = SubmitDocumentRequest {
		tenant_id: payload.tenant_id,
		source_ref: payload.source_ref,
		bytes: payload.content.into_bytes(),
		metadata: payload.metadata,
	};
	let response = state.service.submit_document(request).await?;

	Ok(Json(response))
}

async fn ingest_table(
	State(state): State<AppState>,
	Json(payload): Json<RegisterTableRequest>,
) -> Result<Json<TableReport>, ApiError> {
	let response = state.service.register_table(payload).await?;

	Ok(Json(response))
}

async fn retrieve(
	State(state): State<AppState>,
	Json(payload): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, ApiError> {
	let response = state.service.retrieve(payload).await?;

	Ok(Json(response))
}

async fn query_table(
	State(state): State<AppState>,
	Json(payload): Json<TableQueryRequest>,
) -> Result<Json<TableQueryResponse>, ApiError> {
	let response = state.service.query_table(payload).await?;

	Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct RunListQuery {
	tenant_id: String,
	limit: Option<u32>,
	offset: Option<u32>,
}

async fn list_runs(
	State(state): State<AppState>,
	headers: HeaderMap,
	Query(query): Query<RunListQuery>,
) -> Result<Json<RunListPage>, ApiError> {
	let response = state
		.service
		.list_runs(RunListRequest {
			token: bearer_token(&headers),
			tenant_id: query.tenant_id,
			limit: query.limit,
			offset: query.offset,
		})
		.await?;

	Ok(Json(response))
}

async fn run_detail(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(run_id): Path<Uuid>,
) -> Result<Json<RunDetail>, ApiError> {
	let token = bearer_token(&headers);
	let response = state.service.run_detail(token.as_deref(), run_id).await?;

	Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct ReembedRequest {
	tenant_id: String,
	limit: Option<u32>,
}

const REEMBED_DEFAULT_LIMIT: u32 = 256;

async fn reembed(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<ReembedRequest>,
) -> Result<Json<ReembedReport>, ApiError> {
	state.service.authorize_telemetry(bearer_token(&headers).as_deref())?;

	let limit = payload.limit.unwrap_or(REEMBED_DEFAULT_LIMIT);
	let response = state.service.reembed_stale(&payload.tenant_id, limit).await?;

	Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct RebuildRequest {
	tenant_id: String,
}

async fn rebuild(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<RebuildRequest>,
) -> Result<Json<RebuildReport>, ApiError> {
	state.service.authorize_telemetry(bearer_token(&headers).as_deref())?;

	let response = state.service.rebuild_index(&payload.tenant_id).await?;

	Ok(Json(response))
}

async fn reconcile(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<ReconcileReport>, ApiError> {
	state.service.authorize_telemetry(bearer_token(&headers).as_deref())?;

	let response = state.service.reconcile_pending().await?;

	Ok(Json(response))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
	headers
		.get(header::AUTHORIZATION)?
		.to_str()
		.ok()?
		.strip_prefix("Bearer ")
		.map(ToString::to_string)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: &'static str,
	message: String,
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		let message = err.to_string();
		let (status, error_code) = match err {
			ServiceError::Validation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
			ServiceError::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "unauthorized"),
			ServiceError::PolicyViolation { .. } => (StatusCode::FORBIDDEN, "policy_violation"),
			ServiceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
			ServiceError::SchemaDrift { .. } => (StatusCode::CONFLICT, "schema_drift"),
			ServiceError::ProviderUnavailable { .. } =>
				(StatusCode::SERVICE_UNAVAILABLE, "provider_unavailable"),
			ServiceError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
			ServiceError::IndexInconsistency { .. } =>
				(StatusCode::INTERNAL_SERVER_ERROR, "index_inconsistency"),
			ServiceError::Storage { .. }
			| ServiceError::Index { .. }
			| ServiceError::Init { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
		};

		Self { status, error_code, message }
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code.to_string(), message: self.message };

		(self.status, Json(body)).into_response()
	}
}
