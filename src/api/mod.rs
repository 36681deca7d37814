use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use tracing::info;

use crate::capture::CaptureService;
use crate::config::Config;
use crate::database::CameraStore;
use crate::manager::SessionManager;

pub mod dto;
pub mod error;
pub mod routes;

pub use error::ApiError;

/// Shared state handed to every request handler.
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub capture: Arc<CaptureService>,
    pub store: Option<Arc<dyn CameraStore>>,
}

pub async fn start_server(config: Arc<Config>, state: AppState) -> std::io::Result<()> {
    let bind = (config.api.host.clone(), config.api.port);
    info!(host = %bind.0, port = bind.1, "starting API server");

    let data = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .configure(routes::configure_routes)
    })
    .bind(bind)?
    .run()
    .await
}
