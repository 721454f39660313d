mod demo;
mod encode;
mod error;
mod flow;
mod gemini;
mod store;
mod types;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{Instrument, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::demo::{DemoCatalog, ProfileKind};
use crate::error::VerifyError;
use crate::flow::VerificationFlow;
use crate::gemini::{GeminiVerifier, IdentityVerifier};
use crate::store::{InMemorySessionStore, SessionStats, SessionStore};
use crate::types::{CapturedImage, Step, VerificationResult, VerificationSession};

#[derive(Clone)]
struct AppState {
    drafts: Arc<DashMap<String, Arc<Mutex<VerificationFlow>>>>,
    catalog: Arc<DemoCatalog>,
    verifier: Arc<dyn IdentityVerifier>,
    store: Arc<InMemorySessionStore>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowView {
    id: String,
    step: Step,
    name: String,
    has_id_image: bool,
    has_selfie_image: bool,
    can_advance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<VerificationResult>,
}

#[derive(Debug, Deserialize)]
struct NameRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageUpload {
    /// Base64-encoded image bytes.
    data: String,
    mime_type: String,
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AutofillRequest {
    profile: ProfileKind,
}

/// Initialize structured JSON tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "identity_verification_service=debug,tower_http=debug".into());

    match log_format.as_str() {
        "pretty" => {
            // Human-readable logging for development
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            // Structured JSON logging for production
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    request.headers_mut().insert(
        "x-correlation-id",
        HeaderValue::from_str(&correlation_id).unwrap(),
    );

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);

    next.run(request).instrument(span).await
}

#[tokio::main]
async fn main() {
    init_tracing();

    // The provider credential is required up front and never logged.
    let api_key = match std::env::var("GEMINI_API_KEY") {
        Ok(key) => key,
        Err(_) => {
            error!("GEMINI_API_KEY not set");
            std::process::exit(1);
        }
    };

    let catalog = Arc::new(DemoCatalog::new());
    let verifier: Arc<dyn IdentityVerifier> = Arc::new(GeminiVerifier::new(api_key));
    let store = Arc::new(InMemorySessionStore::new());

    let app_state = AppState {
        drafts: Arc::new(DashMap::new()),
        catalog,
        verifier,
        store,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/verifications", post(create_verification))
        .route("/verifications/{id}", get(get_verification))
        .route("/verifications/{id}/name", post(submit_name))
        .route("/verifications/{id}/id-image", post(upload_id_image))
        .route("/verifications/{id}/selfie-image", post(upload_selfie_image))
        .route("/verifications/{id}/advance", post(advance_verification))
        .route("/verifications/{id}/autofill", post(autofill_verification))
        .route("/verifications/{id}/restart", post(restart_verification))
        .route("/sessions", get(list_sessions))
        .route("/sessions/stats", get(session_stats))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();

    info!("Server running on http://{}", bind_addr);

    axum::serve(listener, app).await.unwrap();
}

async fn health_check() -> &'static str {
    "OK"
}

fn view(id: &str, flow: &VerificationFlow) -> FlowView {
    FlowView {
        id: id.to_string(),
        step: flow.step(),
        name: flow.name().to_string(),
        has_id_image: flow.has_id_image(),
        has_selfie_image: flow.has_selfie_image(),
        can_advance: flow.can_advance(),
        result: flow.result().cloned(),
    }
}

fn map_flow_error(id: &str, e: VerifyError) -> StatusCode {
    match e {
        VerifyError::DemoFetch(ref message) => {
            error!(draft_id = %id, error = %message, "Demo profile load failed");
            StatusCode::BAD_GATEWAY
        }
        other => {
            error!(draft_id = %id, error = %other, "Verification flow error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn get_draft(
    state: &AppState,
    id: &str,
) -> Result<Arc<Mutex<VerificationFlow>>, StatusCode> {
    state
        .drafts
        .get(id)
        .map(|entry| entry.clone())
        .ok_or(StatusCode::NOT_FOUND)
}

async fn create_verification(State(state): State<AppState>) -> Json<FlowView> {
    let id = Uuid::new_v4().to_string();
    let flow = VerificationFlow::new(
        state.catalog.clone(),
        state.verifier.clone(),
        state.store.clone(),
    );

    let flow_view = view(&id, &flow);
    state.drafts.insert(id.clone(), Arc::new(Mutex::new(flow)));

    info!(draft_id = %id, "Verification draft created");
    Json(flow_view)
}

async fn get_verification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlowView>, StatusCode> {
    let draft = get_draft(&state, &id)?;
    let flow = draft.lock().await;
    Ok(Json(view(&id, &flow)))
}

async fn submit_name(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<NameRequest>,
) -> Result<Json<FlowView>, StatusCode> {
    let draft = get_draft(&state, &id)?;
    let mut flow = draft.lock().await;
    flow.set_name(request.name);
    Ok(Json(view(&id, &flow)))
}

fn decode_upload(upload: ImageUpload, default_name: &str) -> Result<CapturedImage, StatusCode> {
    let bytes = STANDARD
        .decode(upload.data.as_bytes())
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok(CapturedImage::from_bytes(
        bytes,
        upload.mime_type,
        upload.file_name.unwrap_or_else(|| default_name.to_string()),
    ))
}

async fn upload_id_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(upload): Json<ImageUpload>,
) -> Result<Json<FlowView>, StatusCode> {
    let draft = get_draft(&state, &id)?;
    let image = decode_upload(upload, "id.jpg")?;
    let mut flow = draft.lock().await;
    flow.set_id_image(image);
    Ok(Json(view(&id, &flow)))
}

async fn upload_selfie_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(upload): Json<ImageUpload>,
) -> Result<Json<FlowView>, StatusCode> {
    let draft = get_draft(&state, &id)?;
    let image = decode_upload(upload, "selfie.jpg")?;
    let mut flow = draft.lock().await;
    flow.set_selfie_image(image);
    Ok(Json(view(&id, &flow)))
}

async fn advance_verification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlowView>, StatusCode> {
    let draft = get_draft(&state, &id)?;
    let mut flow = draft.lock().await;

    match flow.advance().await {
        Ok(step) => {
            info!(draft_id = %id, step = ?step, "Verification draft advanced");
            let flow_view = view(&id, &flow);
            drop(flow);

            // A draft that reached results is finished: its outcome travels
            // on this response and the session lives in the store, so the
            // registry entry can go.
            if step == Step::Results {
                state.drafts.remove(&id);
                info!(draft_id = %id, "Completed verification draft evicted");
            }

            Ok(Json(flow_view))
        }
        Err(e) => Err(map_flow_error(&id, e)),
    }
}

async fn autofill_verification(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AutofillRequest>,
) -> Result<Json<FlowView>, StatusCode> {
    let draft = get_draft(&state, &id)?;
    let mut flow = draft.lock().await;

    match flow.autofill(request.profile).await {
        Ok(step) => {
            info!(draft_id = %id, step = ?step, "Demo profile applied");
            Ok(Json(view(&id, &flow)))
        }
        Err(e) => Err(map_flow_error(&id, e)),
    }
}

async fn restart_verification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlowView>, StatusCode> {
    let draft = get_draft(&state, &id)?;
    let mut flow = draft.lock().await;
    flow.restart();
    info!(draft_id = %id, "Verification draft restarted");
    Ok(Json(view(&id, &flow)))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<VerificationSession>> {
    Json(state.store.list().await)
}

async fn session_stats(State(state): State<AppState>) -> Json<SessionStats> {
    Json(state.store.stats().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::fallback_result;
    use async_trait::async_trait;

    struct StubVerifier;

    #[async_trait]
    impl IdentityVerifier for StubVerifier {
        async fn verify(
            &self,
            _claimed_name: &str,
            _id_image: &CapturedImage,
            _selfie_image: &CapturedImage,
        ) -> crate::error::Result<VerificationResult> {
            Ok(fallback_result())
        }
    }

    fn test_state() -> AppState {
        AppState {
            drafts: Arc::new(DashMap::new()),
            catalog: Arc::new(DemoCatalog::new()),
            verifier: Arc::new(StubVerifier),
            store: Arc::new(InMemorySessionStore::new()),
        }
    }

    fn upload(bytes: &[u8]) -> ImageUpload {
        ImageUpload {
            data: STANDARD.encode(bytes),
            mime_type: "image/jpeg".to_string(),
            file_name: None,
        }
    }

    #[tokio::test]
    async fn completed_draft_is_evicted_from_the_registry() {
        let state = test_state();

        let created = create_verification(State(state.clone())).await.0;
        let id = created.id;

        submit_name(
            State(state.clone()),
            Path(id.clone()),
            Json(NameRequest {
                name: "Random User".to_string(),
            }),
        )
        .await
        .unwrap();
        advance_verification(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();

        upload_id_image(
            State(state.clone()),
            Path(id.clone()),
            Json(upload(&[0xFF, 0xD8, 0xFF, 0x01])),
        )
        .await
        .unwrap();
        advance_verification(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();

        upload_selfie_image(
            State(state.clone()),
            Path(id.clone()),
            Json(upload(&[0xFF, 0xD8, 0xFF, 0x02])),
        )
        .await
        .unwrap();
        let final_view = advance_verification(State(state.clone()), Path(id.clone()))
            .await
            .unwrap()
            .0;

        assert_eq!(final_view.step, Step::Results);
        assert!(final_view.result.is_some());

        // The session is recorded; the draft no longer is.
        assert_eq!(state.store.len().await, 1);
        assert!(state.drafts.get(&id).is_none());
        assert_eq!(
            get_verification(State(state.clone()), Path(id)).await.err(),
            Some(StatusCode::NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn blocked_advance_keeps_the_draft() {
        let state = test_state();
        let created = create_verification(State(state.clone())).await.0;
        let id = created.id;

        // Name too short: advance is blocked, not an error, draft stays.
        submit_name(
            State(state.clone()),
            Path(id.clone()),
            Json(NameRequest {
                name: "ab".to_string(),
            }),
        )
        .await
        .unwrap();
        let view = advance_verification(State(state.clone()), Path(id.clone()))
            .await
            .unwrap()
            .0;

        assert_eq!(view.step, Step::Details);
        assert!(state.drafts.get(&id).is_some());
    }
}
