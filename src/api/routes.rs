use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::debug;
use validator::Validate;

use crate::api::dto::{
    validate_camera_id, CaptureRequest, ProbeRequest, SessionListResponse,
    StartSessionRequest, StopAllResponse, StopResponse,
};
use crate::api::{ApiError, AppState};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/sessions")
                    .route("", web::get().to(list_sessions))
                    .route("/stop-all", web::post().to(stop_all_sessions))
                    .route("/{camera_id}", web::get().to(get_session))
                    .route("/{camera_id}/start", web::post().to(start_session))
                    .route("/{camera_id}/stop", web::post().to(stop_session))
                    .route("/{camera_id}/touch", web::post().to(touch_session))
                    .route("/{camera_id}/capture", web::post().to(capture_clip)),
            )
            .service(
                web::scope("/cameras")
                    .route("", web::get().to(list_cameras))
                    .route("/probe", web::post().to(probe_source)),
            ),
    );
}

async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    debug!("health check requested");
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "camera-stream-manager",
        "active_sessions": state.manager.session_count(),
    })))
}

async fn list_sessions(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let sessions = state.manager.list();
    let response = SessionListResponse {
        total_count: sessions.len(),
        sessions,
    };
    Ok(HttpResponse::Ok().json(response))
}

async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let camera_id = path.into_inner();
    validate_camera_id(&camera_id)?;

    let info = state
        .manager
        .get(&camera_id)
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", camera_id)))?;
    Ok(HttpResponse::Ok().json(info))
}

async fn start_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: Option<web::Json<StartSessionRequest>>,
) -> Result<HttpResponse, ApiError> {
    let camera_id = path.into_inner();
    validate_camera_id(&camera_id)?;

    let requested_url = match req {
        Some(req) => {
            req.validate()
                .map_err(|e| ApiError::ValidationError(e.to_string()))?;
            req.into_inner().source_url
        }
        None => None,
    };

    let source_url = resolve_source(&state, &camera_id, requested_url).await?;
    let info = state.manager.start(&camera_id, &source_url)?;
    Ok(HttpResponse::Ok().json(info))
}

async fn stop_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let camera_id = path.into_inner();
    validate_camera_id(&camera_id)?;

    let stopped = state.manager.stop(&camera_id).await;
    Ok(HttpResponse::Ok().json(StopResponse { camera_id, stopped }))
}

async fn stop_all_sessions(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let stopped_count = state.manager.session_count();
    state.manager.stop_all().await;
    Ok(HttpResponse::Ok().json(StopAllResponse { stopped_count }))
}

/// Called by the delivery layer for every consumed segment; must stay
/// cheap and must never fail for unknown cameras.
async fn touch_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let camera_id = path.into_inner();
    validate_camera_id(&camera_id)?;

    state.manager.touch(&camera_id);
    Ok(HttpResponse::NoContent().finish())
}

async fn capture_clip(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: Option<web::Json<CaptureRequest>>,
) -> Result<HttpResponse, ApiError> {
    let camera_id = path.into_inner();
    validate_camera_id(&camera_id)?;

    let (requested_url, duration) = match req {
        Some(req) => {
            req.validate()
                .map_err(|e| ApiError::ValidationError(e.to_string()))?;
            let req = req.into_inner();
            (req.source_url, req.duration_seconds)
        }
        None => (None, None),
    };

    let source_url = resolve_source(&state, &camera_id, requested_url).await?;
    let clip = state
        .capture
        .record_clip(&camera_id, &source_url, duration)
        .await?;
    Ok(HttpResponse::Created().json(clip))
}

async fn list_cameras(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let store = state
        .store
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("no camera store configured".to_string()))?;

    let cameras = store.list_cameras().await?;
    Ok(HttpResponse::Ok().json(cameras))
}

async fn probe_source(
    state: web::Data<AppState>,
    req: web::Json<ProbeRequest>,
) -> Result<HttpResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::ValidationError(e.to_string()))?;
    let req = req.into_inner();

    let source_url = match (&req.source_url, &req.camera_id) {
        (Some(url), _) => url.clone(),
        (None, Some(camera_id)) => {
            validate_camera_id(camera_id)?;
            resolve_source(&state, camera_id, None).await?
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "either camera_id or source_url is required".to_string(),
            ))
        }
    };

    let reachable = state.capture.probe_source(&source_url).await?;
    Ok(HttpResponse::Ok().json(crate::api::dto::ProbeResponse {
        source_url,
        reachable,
    }))
}

/// A request may carry the source explicitly; otherwise the camera store
/// resolves the camera's current source address.
async fn resolve_source(
    state: &AppState,
    camera_id: &str,
    requested: Option<String>,
) -> Result<String, ApiError> {
    if let Some(url) = requested {
        return Ok(url);
    }

    let store = state.store.as_ref().ok_or_else(|| {
        ApiError::BadRequest(
            "source_url is required when no camera store is configured".to_string(),
        )
    })?;

    let camera = store
        .get_camera(camera_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Camera not found: {}", camera_id)))?;
    Ok(camera.source_url)
}
