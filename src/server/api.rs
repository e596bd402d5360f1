use axum::{
    body::Bytes,
    extract::{ Path, Query, State },
    http::StatusCode,
    middleware,
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use chrono::NaiveDate;
use governor::{ clock::DefaultClock, state::{ InMemoryState, NotKeyed }, Quota, RateLimiter };
use log::{ error, info, warn };
use serde::{ Deserialize, Serialize };
use serde_json::{ json, Value };
use std::num::NonZeroU32;
use std::sync::Arc;
use tower_http::cors::{ Any, CorsLayer };

use super::chat::chat_handler;
use crate::auth::{ require_access, AccessGate, PasswordHasher };
use crate::history::{ StoreError, Stores };
use crate::models::conversation::{ parse_user_id, ConversationFilter, SaveSessionRequest };
use crate::models::user::{ NewUser, UserProfile };
use crate::relay::StreamRelay;

pub type ChatLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<StreamRelay>,
    pub stores: Stores,
    pub hasher: PasswordHasher,
    pub gate: AccessGate,
    pub chat_limiter: Option<Arc<ChatLimiter>>,
}

impl AppState {
    pub fn new(relay: StreamRelay, stores: Stores, hasher: PasswordHasher, gate: AccessGate) -> Self {
        Self {
            relay: Arc::new(relay),
            stores,
            hasher,
            gate,
            chat_limiter: None,
        }
    }

    /// Caps `/chat` at `per_second` requests across all clients. 0 leaves it unlimited.
    pub fn with_chat_rate_limit(mut self, per_second: u32) -> Self {
        self.chat_limiter = NonZeroU32::new(per_second).map(|n|
            Arc::new(RateLimiter::direct(Quota::per_second(n)))
        );
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let gated = Router::new()
        .route("/save_conversation_session", post(save_session_handler))
        .route("/api/all-users", get(all_users_handler))
        .route("/api/conversations/{user_id}", get(user_conversations_handler))
        .route("/api/conversations-by-filters", get(filtered_conversations_handler))
        .route_layer(middleware::from_fn_with_state(state.gate.clone(), require_access));

    Router::new()
        .route("/", get(|| async { "Backend is running!" }))
        .route("/chat", post(chat_handler))
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .merge(gated)
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

pub(crate) fn json_error(status: StatusCode, error: impl Into<String>, details: Option<String>) -> Response {
    (status, Json(ErrorResponse { error: error.into(), details })).into_response()
}

fn store_failure(context: &str, err: StoreError) -> Response {
    error!("{}: {}", context, err);
    match err {
        StoreError::DuplicateEmail =>
            json_error(StatusCode::CONFLICT, "Email already registered.", None),
        StoreError::Backend(details) =>
            json_error(StatusCode::INTERNAL_SERVER_ERROR, context, Some(details)),
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        json_error(StatusCode::BAD_REQUEST, "Request body must be valid JSON.", Some(e.to_string()))
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_day(value: Option<String>) -> Result<Option<NaiveDate>, Response> {
    match non_blank(value) {
        None => Ok(None),
        Some(raw) =>
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| {
                    json_error(
                        StatusCode::BAD_REQUEST,
                        format!("Invalid date '{}'. Use YYYY-MM-DD.", raw),
                        None
                    )
                }),
    }
}

// --- Accounts ---

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    email: Option<String>,
    password: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    gender: Option<String>,
    grade_level: Option<String>,
    dob: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
struct AccountResponse {
    message: &'static str,
    #[serde(rename = "userID")]
    user_id: i64,
}

async fn register_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let req: RegisterRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    let (Some(email), Some(password)) = (non_blank(req.email), req.password.filter(|p| !p.is_empty())) else {
        return json_error(StatusCode::BAD_REQUEST, "Email and password are required.", None);
    };
    let dob = match parse_day(req.dob) {
        Ok(dob) => dob,
        Err(resp) => return resp,
    };

    let hasher = state.hasher;
    let password_hash = match tokio::task::spawn_blocking(move || hasher.hash(&password)).await {
        Ok(Ok(hash)) => hash,
        Ok(Err(e)) => return json_error(StatusCode::BAD_REQUEST, e.to_string(), None),
        Err(e) => {
            error!("Password hashing task failed: {}", e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to register user.", None);
        }
    };

    let user = NewUser {
        email,
        password_hash,
        profile: UserProfile {
            first_name: non_blank(req.first_name),
            last_name: non_blank(req.last_name),
            gender: non_blank(req.gender),
            grade_level: non_blank(req.grade_level),
            dob,
        },
    };
    match state.stores.users.create_user(user).await {
        Ok(user_id) => {
            info!("Registered user {}", user_id);
            (
                StatusCode::CREATED,
                Json(AccountResponse { message: "User registered successfully!", user_id }),
            ).into_response()
        }
        Err(e) => store_failure("Failed to register user.", e),
    }
}

async fn login_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let req: LoginRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    let denied = || json_error(StatusCode::UNAUTHORIZED, "Invalid email or password.", None);
    let (Some(email), Some(password)) = (non_blank(req.email), req.password) else {
        return denied();
    };

    let credentials = match state.stores.users.find_credentials(&email).await {
        Ok(Some(credentials)) => credentials,
        Ok(None) => return denied(),
        Err(e) => return store_failure("Failed to login.", e),
    };

    let hasher = state.hasher;
    let stored = credentials.password_hash;
    let verified = tokio::task::spawn_blocking(move || hasher.verify(&password, &stored)).await;
    match verified {
        Ok(Ok(true)) =>
            (
                StatusCode::OK,
                Json(AccountResponse { message: "Login successful!", user_id: credentials.id }),
            ).into_response(),
        Ok(Ok(false)) => denied(),
        Ok(Err(e)) => {
            error!("Stored hash for user {} is unusable: {}", credentials.id, e);
            denied()
        }
        Err(e) => {
            error!("Password verification task failed: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to login.", None)
        }
    }
}

// --- Transcripts ---

async fn save_session_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let req: SaveSessionRequest = match parse_json(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    let (user_id, turns) = match req.into_turns() {
        Ok(parsed) => parsed,
        Err(message) => {
            warn!("Rejecting conversation save: {}", message);
            return json_error(StatusCode::BAD_REQUEST, message, None);
        }
    };
    if turns.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "No valid messages to save.", None);
    }

    match state.stores.users.get_user(user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!("Rejecting conversation save for unknown user {}", user_id);
            return json_error(StatusCode::NOT_FOUND, format!("User {} does not exist.", user_id), None);
        }
        Err(e) => {
            return store_failure("Failed to save conversation session.", e);
        }
    }

    match state.stores.conversations.save_batch(user_id, turns).await {
        Ok(saved) => {
            info!("Saved {} conversation rows for user {}", saved, user_id);
            (
                StatusCode::CREATED,
                Json(json!({ "message": "Conversation session saved successfully!", "saved": saved })),
            ).into_response()
        }
        Err(e) => store_failure("Failed to save conversation session.", e),
    }
}

async fn all_users_handler(State(state): State<AppState>) -> Response {
    match state.stores.users.list_users().await {
        Ok(users) => Json(users).into_response(),
        Err(e) => store_failure("Failed to fetch users.", e),
    }
}

async fn user_conversations_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>
) -> Response {
    let Some(user_id) = parse_user_id(&Value::String(user_id)) else {
        return json_error(StatusCode::BAD_REQUEST, "Invalid UserID provided.", None);
    };
    match state.stores.conversations.list_by_user(user_id).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => store_failure("Failed to fetch conversation history.", e),
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FilterQuery {
    user_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn filtered_conversations_handler(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>
) -> Response {
    let user_id = match non_blank(query.user_id) {
        None => None,
        Some(raw) =>
            match parse_user_id(&Value::String(raw)) {
                Some(id) => Some(id),
                None => {
                    return json_error(StatusCode::BAD_REQUEST, "Invalid UserID provided.", None);
                }
            }
    };
    let (start, end) = match (parse_day(query.start_date), parse_day(query.end_date)) {
        (Ok(start), Ok(end)) => (start, end),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };

    let filter = ConversationFilter::from_dates(user_id, start, end);
    match state.stores.conversations.list_by_filters(&filter).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => store_failure("Failed to fetch conversations.", e),
    }
}
