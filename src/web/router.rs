use axum::{Json, Router, extract::DefaultBodyLimit, routing::get};
use chrono::Utc;
use tower_http::{
    catch_panic::CatchPanicLayer, cors::CorsLayer, services::ServeDir, trace::TraceLayer,
};

use crate::{
    config::{StorageSettings, UploadSettings},
    modules,
    web::{
        AppState, auth,
        error::{panic_response, route_not_found},
        responses::HealthStatus,
    },
};

const SERVICE_NAME: &str = "society-cms";
// Room for multipart framing and the non-file fields of a request.
const MULTIPART_SLACK: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = body_limit(&state.config().upload);

    let mut router = Router::new()
        .route("/health", get(health))
        .merge(auth::router())
        .merge(modules::committees::router())
        .merge(modules::executives::router())
        .merge(modules::blogposts::router())
        .merge(modules::events::router());

    // Local blobs are served by this process; remote stores hand out their own URLs.
    if let StorageSettings::Local {
        root,
        public_prefix,
    } = &state.config().storage
    {
        router = router.nest_service(public_prefix, ServeDir::new(root));
    }

    router
        .fallback(route_not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

/// Largest request body accepted: a full gallery batch plus framing.
fn body_limit(upload: &UploadSettings) -> usize {
    usize::try_from(upload.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_mul(upload.max_batch.max(1))
        .saturating_add(MULTIPART_SLACK)
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        timestamp: Utc::now(),
        service: SERVICE_NAME,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::{
        storage::testing::MemoryBlobStore,
        web::testing::{
            TEST_MAX_FILE_SIZE, bearer, json_request, multipart_request, send, test_state,
        },
    };

    fn app() -> (Router, AppState, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::default());
        let state = test_state(blobs.clone());
        (build_router(state.clone()), state, blobs)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_service() {
        let (app, _, _) = app();
        let (status, body) = send(&app, get("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], SERVICE_NAME);
    }

    #[tokio::test]
    async fn mutations_require_a_token() {
        let (app, _, _) = app();
        let request = json_request(Method::POST, "/committees", None, json!({"name": "IoT"}));
        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["statusCode"], 401);
    }

    #[tokio::test]
    async fn forged_tokens_are_rejected() {
        let (app, _, _) = app();
        let request = Request::delete(format!("/events/{}", Uuid::new_v4()))
            .header(axum::http::header::AUTHORIZATION, "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_before_storage() {
        let (app, state, blobs) = app();
        let data = vec![0u8; TEST_MAX_FILE_SIZE + 1];
        let request = multipart_request(
            &format!("/committees/{}/logo", Uuid::new_v4()),
            &bearer(&state),
            "file",
            &[("logo.png", data.as_slice())],
        );

        let (status, _) = send(&app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(blobs.call_count(), 0);
    }

    #[tokio::test]
    async fn disallowed_extension_is_rejected_before_storage() {
        let (app, state, blobs) = app();
        let request = multipart_request(
            &format!("/events/{}/photos", Uuid::new_v4()),
            &bearer(&state),
            "files",
            &[("notes.gif", &b"GIF89a"[..])],
        );

        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains(".gif"));
        assert_eq!(blobs.call_count(), 0);
    }

    #[tokio::test]
    async fn blank_login_is_a_bad_request() {
        let (app, _, _) = app();
        let request = json_request(
            Method::POST,
            "/auth/login",
            None,
            json!({"username": " ", "password": ""}),
        );
        let (status, _) = send(&app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_ids_are_bad_requests() {
        let (app, _, _) = app();
        let (status, _) = send(&app, get("/committees/not-a-uuid")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_routes_use_error_envelope() {
        let (app, _, _) = app();
        let (status, body) = send(&app, get("/nope")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["statusCode"], 404);
    }

    #[test]
    fn body_limit_covers_a_full_batch() {
        let upload = UploadSettings {
            max_file_size: 10,
            allowed_extensions: Vec::new(),
            max_batch: 3,
        };
        assert_eq!(body_limit(&upload), 30 + MULTIPART_SLACK);
    }
}
