use axum::{
    extract::Request,
    http::{Method, StatusCode},
    middleware::{from_fn, Next},
    response::IntoResponse,
    response::Response,
    routing::{delete, get, patch, post},
    Json, Router,
};
use conclave_core::AppState;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

pub mod error;
pub mod middleware;
pub mod routes;

pub fn build_router() -> Router<AppState> {
    let cors = build_cors_layer();
    Router::new()
        // Health
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/v1/metrics", get(metrics))
        // Auth
        .route("/api/v1/auth/register", post(routes::auth::register))
        .route("/api/v1/auth/login", post(routes::auth::login))
        // Sessions
        .route(
            "/api/v1/sessions",
            get(routes::sessions::list_sessions).post(routes::sessions::create_session),
        )
        .route("/api/v1/sessions/{session_id}", get(routes::sessions::get_session))
        .route(
            "/api/v1/sessions/{session_id}/end",
            post(routes::sessions::end_session),
        )
        // Participants
        .route(
            "/api/v1/sessions/{session_id}/participants",
            get(routes::participants::list_participants),
        )
        .route(
            "/api/v1/sessions/{session_id}/join",
            post(routes::participants::request_join),
        )
        .route(
            "/api/v1/sessions/{session_id}/participants/@me/accept",
            post(routes::participants::accept_invite),
        )
        .route(
            "/api/v1/sessions/{session_id}/participants/@me",
            delete(routes::participants::leave),
        )
        .route(
            "/api/v1/sessions/{session_id}/participants/{user_id}/invite",
            post(routes::participants::invite),
        )
        .route(
            "/api/v1/sessions/{session_id}/participants/{user_id}/approve",
            post(routes::participants::approve),
        )
        .route(
            "/api/v1/sessions/{session_id}/participants/{user_id}/reject",
            post(routes::participants::reject),
        )
        .route(
            "/api/v1/sessions/{session_id}/participants/{user_id}",
            delete(routes::participants::remove),
        )
        // Messages
        .route(
            "/api/v1/sessions/{session_id}/messages",
            get(routes::messages::list_messages).post(routes::messages::send_message),
        )
        .route(
            "/api/v1/sessions/{session_id}/messages/{message_id}",
            delete(routes::messages::delete_message),
        )
        // Signaling
        .route(
            "/api/v1/sessions/{session_id}/signaling",
            post(routes::signaling::relay_signal),
        )
        // Admin
        .route(
            "/api/v1/admin/users/{user_id}/flags",
            patch(routes::admin::set_user_flags),
        )
        // Middleware layers
        .layer(cors)
        .layer(from_fn(rate_limit_middleware))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn build_cors_layer() -> tower_http::cors::CorsLayer {
    // The service fronts browser and desktop clients from arbitrary
    // origins; session-level authorization is the real gate.
    tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "conclave" })),
    )
}

async fn metrics() -> impl IntoResponse {
    let requests = REQUEST_COUNT.load(Ordering::Relaxed);
    let limited = RATE_LIMITED_COUNT.load(Ordering::Relaxed);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        format!(
            "conclave_up 1\nconclave_http_requests_total {}\nconclave_http_rate_limited_total {}\n",
            requests, limited
        ),
    )
}

static RATE_LIMIT_STATE: OnceLock<Mutex<HashMap<String, (i64, u32)>>> = OnceLock::new();
static REQUEST_COUNT: AtomicU64 = AtomicU64::new(0);
static RATE_LIMITED_COUNT: AtomicU64 = AtomicU64::new(0);

const RATE_LIMIT_PER_SECOND: u32 = 300;

fn rate_limit_state() -> &'static Mutex<HashMap<String, (i64, u32)>> {
    RATE_LIMIT_STATE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Fixed one-second window per client IP. Coarse, but enough to keep a
/// misbehaving client from starving the pool.
async fn rate_limit_middleware(req: Request, next: Next) -> Response {
    REQUEST_COUNT.fetch_add(1, Ordering::Relaxed);
    let now = chrono::Utc::now().timestamp();
    let key = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("local")
        .to_string();

    let allowed = {
        let mut map = match rate_limit_state().lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = map.entry(key).or_insert((now, 0));
        if entry.0 != now {
            *entry = (now, 0);
        }
        if entry.1 >= RATE_LIMIT_PER_SECOND {
            false
        } else {
            entry.1 += 1;
            true
        }
    };

    if !allowed {
        RATE_LIMITED_COUNT.fetch_add(1, Ordering::Relaxed);
        return crate::error::ApiError::RateLimited.into_response();
    }

    next.run(req).await
}
