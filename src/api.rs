// 🌐 REST API with Axum
// Members, parties, expenses, participants and rank rates, plus the
// settlement and the interactive rate preview.

use crate::config::Settings;
use crate::db::{self, NewExpense, NewMember, NewParty, NotFound};
use crate::error::SettleError;
use crate::numeric::Rank;
use crate::rates::{RankRates, RateAllocator};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub settings: Settings,
}

impl AppState {
    pub fn new(conn: Connection, settings: Settings) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            settings,
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".to_string()))
    }
}

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(settle) = err.downcast_ref::<SettleError>() {
            if settle.is_client_error() {
                return ApiError::BadRequest(settle.to_string());
            }
        }
        if let Some(missing) = err.downcast_ref::<NotFound>() {
            return ApiError::NotFound(missing.to_string());
        }
        ApiError::Internal(format!("{:#}", err))
    }
}

impl From<SettleError> for ApiError {
    fn from(err: SettleError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(message) => {
                error!(%message, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

fn not_found(what: &str, id: i64) -> ApiError {
    ApiError::NotFound(format!("{} {} not found", what, id))
}

fn require_party(conn: &Connection, party_id: i64) -> Result<(), ApiError> {
    match db::get_party(conn, party_id)? {
        Some(_) => Ok(()),
        None => Err(not_found("party", party_id)),
    }
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PartyUpdate {
    pub name: String,
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantsRequest {
    pub member_ids: Vec<i64>,
}

/// One slider move: rank `rank` set to `value`, starting from `rates`
#[derive(Debug, Deserialize)]
pub struct RatePreviewRequest {
    #[serde(default)]
    pub rates: RankRates,
    pub rank: Rank,
    pub value: f64,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/members
async fn list_members(State(state): State<AppState>) -> ApiResult<Vec<db::Member>> {
    let conn = state.conn()?;
    ok(db::list_members(&conn)?)
}

/// GET /api/members/:id
async fn get_member(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<db::Member> {
    let conn = state.conn()?;
    let member = db::get_member(&conn, id)?.ok_or_else(|| not_found("member", id))?;
    ok(member)
}

/// POST /api/members
async fn create_member(
    State(state): State<AppState>,
    Json(body): Json<NewMember>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;
    let member = db::create_member(&conn, &body)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(member))))
}

/// PUT /api/members/:id
async fn update_member(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<NewMember>,
) -> ApiResult<db::Member> {
    let conn = state.conn()?;
    let member = db::update_member(&conn, id, &body)?.ok_or_else(|| not_found("member", id))?;
    ok(member)
}

/// DELETE /api/members/:id
async fn delete_member(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<serde_json::Value> {
    let conn = state.conn()?;
    if !db::delete_member(&conn, id)? {
        return Err(not_found("member", id));
    }
    ok(serde_json::json!({ "id": id }))
}

/// GET /api/parties
async fn list_parties(State(state): State<AppState>) -> ApiResult<Vec<db::Party>> {
    let conn = state.conn()?;
    ok(db::list_parties(&conn)?)
}

/// GET /api/parties/:id - party with expenses, participants, rates and settlement
async fn get_party(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<db::PartyDetail> {
    let conn = state.conn()?;
    let detail = db::load_party_detail(&conn, id, state.settings.rate_policy)?
        .ok_or_else(|| not_found("party", id))?;
    ok(detail)
}

/// POST /api/parties
async fn create_party(
    State(state): State<AppState>,
    Json(body): Json<NewParty>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;
    let party = db::create_party(&conn, &body)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(party))))
}

/// PUT /api/parties/:id
async fn update_party(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<PartyUpdate>,
) -> ApiResult<db::Party> {
    let conn = state.conn()?;
    let party = db::update_party(&conn, id, &body.name, &body.date)?
        .ok_or_else(|| not_found("party", id))?;
    ok(party)
}

/// DELETE /api/parties/:id
async fn delete_party(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<serde_json::Value> {
    let conn = state.conn()?;
    if !db::delete_party(&conn, id)? {
        return Err(not_found("party", id));
    }
    ok(serde_json::json!({ "id": id }))
}

/// POST /api/parties/:id/participants
async fn add_participants(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ParticipantsRequest>,
) -> ApiResult<Vec<db::Member>> {
    let conn = state.conn()?;
    require_party(&conn, id)?;
    ok(db::add_participants(&conn, id, &body.member_ids)?)
}

/// DELETE /api/parties/:id/participants/:member_id
async fn remove_participant(
    State(state): State<AppState>,
    Path((id, member_id)): Path<(i64, i64)>,
) -> ApiResult<serde_json::Value> {
    let conn = state.conn()?;
    if !db::remove_participant(&conn, id, member_id)? {
        return Err(ApiError::NotFound(format!(
            "member {} does not attend party {}",
            member_id, id
        )));
    }
    ok(serde_json::json!({ "party_id": id, "member_id": member_id }))
}

/// POST /api/parties/:id/expenses
async fn add_expense(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<NewExpense>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.conn()?;
    require_party(&conn, id)?;
    let expense = db::add_expense(&conn, id, &body)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(expense))))
}

/// PUT /api/parties/:id/expenses/:expense_id
async fn update_expense(
    State(state): State<AppState>,
    Path((id, expense_id)): Path<(i64, i64)>,
    Json(body): Json<NewExpense>,
) -> ApiResult<db::Expense> {
    let conn = state.conn()?;
    require_party(&conn, id)?;
    let expense = db::update_expense(&conn, id, expense_id, &body)?
        .ok_or_else(|| not_found("expense", expense_id))?;
    ok(expense)
}

/// DELETE /api/parties/:id/expenses/:expense_id
async fn delete_expense(
    State(state): State<AppState>,
    Path((id, expense_id)): Path<(i64, i64)>,
) -> ApiResult<serde_json::Value> {
    let conn = state.conn()?;
    if !db::delete_expense(&conn, id, expense_id)? {
        return Err(not_found("expense", expense_id));
    }
    ok(serde_json::json!({ "party_id": id, "expense_id": expense_id }))
}

/// GET /api/parties/:id/rank-rates
async fn get_rank_rates(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<RankRates> {
    let conn = state.conn()?;
    require_party(&conn, id)?;
    ok(db::get_rank_rates(&conn, id)?)
}

/// POST /api/parties/:id/rank-rates - replace the whole rate set
async fn commit_rank_rates(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RankRates>,
) -> ApiResult<RankRates> {
    let conn = state.conn()?;
    ok(db::replace_rank_rates(&conn, id, &body)?)
}

/// POST /api/parties/:id/rank-rates/preview - apply one slider move, no persistence
async fn preview_rank_rates(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RatePreviewRequest>,
) -> ApiResult<crate::rates::RateEdit> {
    let conn = state.conn()?;
    require_party(&conn, id)?;

    let allocator = RateAllocator::new(db::participant_ranks(&conn, id)?);
    ok(allocator.apply(&body.rates, body.rank, body.value)?)
}

/// GET /api/parties/:id/settlement
async fn get_settlement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<crate::settlement::SettlementReport> {
    let conn = state.conn()?;
    ok(db::settle_party(&conn, id, state.settings.rate_policy)?)
}

// ============================================================================
// Router
// ============================================================================

pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/members", get(list_members).post(create_member))
        .route(
            "/members/:id",
            get(get_member).put(update_member).delete(delete_member),
        )
        .route("/parties", get(list_parties).post(create_party))
        .route(
            "/parties/:id",
            get(get_party).put(update_party).delete(delete_party),
        )
        .route("/parties/:id/participants", post(add_participants))
        .route(
            "/parties/:id/participants/:member_id",
            delete(remove_participant),
        )
        .route("/parties/:id/expenses", post(add_expense))
        .route(
            "/parties/:id/expenses/:expense_id",
            put(update_expense).delete(delete_expense),
        )
        .route(
            "/parties/:id/rank-rates",
            get(get_rank_rates).post(commit_rank_rates),
        )
        .route("/parties/:id/rank-rates/preview", post(preview_rank_rates))
        .route("/parties/:id/settlement", get(get_settlement))
        .with_state(state)
}

/// Full application: API under /api, permissive CORS, request tracing
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        router(AppState::new(conn, Settings::default()))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(value) => Body::from(serde_json::to_string(&value).unwrap()),
                None => Body::empty(),
            })
            .unwrap();

        let resp = app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Members Aoki(1), Baba(1), Chiba(2) and a party with all three
    async fn seed(app: &Router) -> (i64, Vec<i64>) {
        let mut ids = Vec::new();
        for (name, rank) in [("Aoki", 1), ("Baba", 1), ("Chiba", 2)] {
            let (status, body) =
                send(app, "POST", "/api/members", Some(json!({"name": name, "rank": rank}))).await;
            assert_eq!(status, StatusCode::CREATED);
            ids.push(body["data"]["id"].as_i64().unwrap());
        }

        let (status, body) = send(
            app,
            "POST",
            "/api/parties",
            Some(json!({"name": "Welcome party", "date": "2024-04-05", "participants": ids})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        (body["data"]["id"].as_i64().unwrap(), ids)
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "OK");
    }

    #[tokio::test]
    async fn full_settlement_flow() {
        let app = test_app();
        let (party_id, ids) = seed(&app).await;

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/parties/{}/expenses", party_id),
            Some(json!({"name": "Course", "amount": 9000, "payer_id": ids[2]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/parties/{}/rank-rates", party_id),
            Some(json!({"1": 60, "2": 40})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["1"], 60.0);

        let (status, body) = send(&app, "GET", &format!("/api/parties/{}", party_id), None).await;
        assert_eq!(status, StatusCode::OK);
        let rows = body["data"]["settlement"]["rows"].as_array().unwrap();
        let to_pay: Vec<i64> = rows.iter().map(|r| r["amount_to_pay"].as_i64().unwrap()).collect();
        assert_eq!(to_pay, vec![2700, 2700, 3600]);
        assert_eq!(body["data"]["name"], "Welcome party");

        let (status, body) =
            send(&app, "GET", &format!("/api/parties/{}/settlement", party_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["rows"][2]["balance"], 5400);
    }

    #[tokio::test]
    async fn rate_preview_uses_party_ranks() {
        let app = test_app();
        let (party_id, _) = seed(&app).await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/parties/{}/rank-rates/preview", party_id),
            Some(json!({"rates": {"1": 70, "2": 30}, "rank": 2, "value": 50})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["rates"]["2"], 30.0);
        assert_eq!(body["data"]["remaining"], 0.0);

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/parties/{}/rank-rates/preview", party_id),
            Some(json!({"rank": 9, "value": 50})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn rate_preview_rejects_out_of_range_rates() {
        let app = test_app();
        let (party_id, _) = seed(&app).await;
        let uri = format!("/api/parties/{}/rank-rates/preview", party_id);

        let (status, body) = send(
            &app,
            "POST",
            &uri,
            Some(json!({"rates": {"1": -50, "2": 0}, "rank": 1, "value": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = send(
            &app,
            "POST",
            &uri,
            Some(json!({"rates": {"1": 150, "2": 0}, "rank": 2, "value": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_members_return_400() {
        let app = test_app();
        let (party_id, ids) = seed(&app).await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/parties/{}/participants", party_id),
            Some(json!({"member_ids": [999]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("999"));

        let (status, _) = send(
            &app,
            "POST",
            "/api/parties",
            Some(json!({"name": "Ghosts", "date": "2024-05-01", "participants": [ids[0], 404]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_rate_commit_is_rejected() {
        let app = test_app();
        let (party_id, _) = seed(&app).await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/parties/{}/rank-rates", party_id),
            Some(json!({"1": 60, "2": 30})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("90"));

        let (status, _) = send(
            &app,
            "POST",
            "/api/parties/999/rank-rates",
            Some(json!({"1": 100})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_records_return_404() {
        let app = test_app();

        let (status, _) = send(&app, "GET", "/api/members/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "GET", "/api/parties/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "DELETE", "/api/parties/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "POST",
            "/api/parties/42/expenses",
            Some(json!({"name": "Drinks", "amount": 100, "payer_id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn validation_errors_return_400() {
        let app = test_app();
        let (party_id, ids) = seed(&app).await;

        let (status, _) =
            send(&app, "POST", "/api/members", Some(json!({"name": "Neg", "rank": -1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/parties/{}/expenses", party_id),
            Some(json!({"name": "Refund", "amount": -5, "payer_id": ids[0]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "PUT",
            &format!("/api/parties/{}", party_id),
            Some(json!({"name": "Renamed", "date": "not-a-date"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn participants_and_expenses_lifecycle() {
        let app = test_app();
        let (party_id, ids) = seed(&app).await;

        let (_, body) = send(
            &app,
            "POST",
            &format!("/api/parties/{}/expenses", party_id),
            Some(json!({"name": "Drinks", "amount": 1200, "payer_id": ids[0]})),
        )
        .await;
        let expense_id = body["data"]["id"].as_i64().unwrap();

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/parties/{}/expenses/{}", party_id, expense_id),
            Some(json!({"name": "Drinks", "amount": 1500, "payer_id": ids[1]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["payer_name"], "Baba");

        let (status, _) = send(
            &app,
            "DELETE",
            &format!("/api/parties/{}/participants/{}", party_id, ids[2]),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/parties/{}/participants", party_id),
            Some(json!({"member_ids": [ids[2]]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 3);

        let (status, _) = send(
            &app,
            "DELETE",
            &format!("/api/parties/{}/expenses/{}", party_id, expense_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, "DELETE", &format!("/api/parties/{}", party_id), None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
