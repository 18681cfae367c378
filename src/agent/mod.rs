//! SUT-side HTTP service (§4.2): `/rapl_power`, `/system_info`,
//! `/firestarter`.

pub mod load_gen;
pub mod rapl;
pub mod system_info;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::AgentConfig;
use load_gen::{FirestarterArgs, LaunchOutcome, LoadGenerator};
use rapl::PackageInfo;

#[derive(Clone)]
pub struct AgentState {
    config: AgentConfig,
    packages: Arc<Vec<PackageInfo>>,
    load_gen: LoadGenerator,
}

impl AgentState {
    pub fn new(config: AgentConfig, packages: Vec<PackageInfo>, firestarter_path: impl Into<Arc<str>>) -> Self {
        AgentState {
            config,
            packages: Arc::new(packages),
            load_gen: LoadGenerator::new(firestarter_path),
        }
    }
}

pub fn router(state: AgentState) -> Router {
    Router::new()
        .route("/rapl_power", get(rapl_power_handler))
        .route("/system_info", get(system_info_handler))
        .route("/firestarter", post(firestarter_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

async fn rapl_power_handler(State(state): State<AgentState>) -> impl IntoResponse {
    match rapl::sample_power(&state.packages, state.config.rapl_sample_window).await {
        Ok(powers) => Json(powers).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to sample rapl power");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

async fn system_info_handler() -> impl IntoResponse {
    Json(system_info::collect().await)
}

async fn firestarter_handler(
    State(state): State<AgentState>,
    Json(args): Json<FirestarterArgs>,
) -> impl IntoResponse {
    match state.load_gen.launch(args).await {
        LaunchOutcome::Accepted => StatusCode::ACCEPTED.into_response(),
        LaunchOutcome::Conflict => (
            StatusCode::CONFLICT,
            Json(json!({"error": "Firestarter already running"})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AgentState {
        AgentState::new(AgentConfig::default(), Vec::new(), "/bin/true")
    }

    #[tokio::test]
    async fn rapl_power_with_no_packages_returns_empty_object() {
        let app = router(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/rapl_power")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn firestarter_single_flight_returns_202_then_409() {
        let app = router(test_state());
        let body = json!({"runtime_secs": 5, "pct_load": 100, "n_threads": 0}).to_string();

        let first = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/firestarter")
                    .header("content-type", "application/json")
                    .body(Body::from(body.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/firestarter")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }
}
