use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    middleware,
    routing::{any, delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use super::state::AppState;
use super::{auth, error, gate, routes, upload};

/// Multipart overhead allowed on top of the raw file bytes.
const MULTIPART_SLACK: usize = 64 * 1024;

/// Assemble the full application: public site and API, admin API behind
/// bearer auth, static files, and the request gate in front of everything.
pub fn build_router(state: AppState) -> Router {
    let upload_limit = state
        .settings
        .upload
        .max_file_size
        .saturating_mul(state.settings.upload.max_files.max(1))
        .saturating_add(MULTIPART_SLACK);

    let uploads = Router::new()
        .route("/api/admin/upload/single", post(upload::upload_single))
        .route("/api/admin/upload/multiple", post(upload::upload_multiple))
        .layer(DefaultBodyLimit::max(upload_limit))
        .route("/api/admin/upload/list", get(upload::list_files))
        .route("/api/admin/upload/{filename}", delete(upload::delete_file));

    let admin = Router::new()
        .route("/api/admin/site-data", get(routes::admin::site_data))
        .route(
            "/api/admin/site-settings",
            put(routes::admin::update_site_settings).post(routes::admin::update_site_settings),
        )
        .route("/api/admin/add-service", post(routes::admin::add_service))
        .route(
            "/api/admin/service/{id}",
            put(routes::admin::update_service).delete(routes::admin::delete_service),
        )
        .route("/api/admin/contacts", get(routes::admin::contacts))
        .route(
            "/api/admin/contact/{id}/status",
            put(routes::admin::update_contact_status),
        )
        .route("/api/admin/analytics", get(routes::admin::analytics))
        .route("/api/admin/backup", get(routes::admin::backup))
        .route("/api/admin/restore", post(routes::admin::restore))
        .route("/api/admin/security/stats", get(routes::security::stats))
        .route("/api/admin/security/blocked-ips", get(routes::security::blocked_ips))
        .route(
            "/api/admin/security/blocked-ips/{ip}",
            delete(routes::security::unblock_ip),
        )
        .route("/api/admin/security/block", post(routes::security::block_ip))
        .route(
            "/api/admin/security/access-stats",
            get(routes::security::access_stats),
        )
        .merge(uploads)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ))
        .route("/api/admin/login", post(routes::admin::login));

    let public = Router::new()
        .route("/", get(routes::public::index))
        .route("/health", get(routes::public::health))
        .route("/api/services", get(routes::public::list_services))
        .route("/api/services/{id}", get(routes::public::get_service))
        .route("/api/site-data", get(routes::public::site_data))
        .route("/api/contact", post(routes::public::submit_contact))
        .route("/api/{*rest}", any(routes::api_not_found));

    let static_files = ServeDir::new(&state.settings.server.static_dir);
    let uploaded_files = ServeDir::new(&state.settings.upload.dir);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(public)
        .merge(admin)
        .nest_service("/uploads", uploaded_files)
        .fallback_service(static_files)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            error::expose_internal_detail,
        ))
        .layer(DefaultBodyLimit::max(state.settings.server.body_limit_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gate::gate_middleware,
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: AppState) -> Result<()> {
    let bind = state.settings.server.bind.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Sitewarden listening on {}", bind);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await
    .context("Server error")?;

    Ok(())
}
