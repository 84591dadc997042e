use std::net::SocketAddr;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{admin, handlers, maintenance, middleware as app_middleware, routes, state::AppState};

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    let request_timeout = state.config.server.request_timeout;

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::health))
        .route("/.well-known/jwks.json", get(handlers::jwks))
        .route("/auth/refresh", post(routes::auth::refresh))
        .route("/auth/logout", post(routes::auth::logout))
        .route("/sessions", get(routes::sessions::list))
        .route("/sessions/{id}", delete(routes::sessions::revoke))
        .route(
            "/admin/users/{id}/sessions/revoke",
            post(admin::sessions::revoke_user_sessions),
        )
        .route(
            "/admin/users/{id}/lockout",
            get(admin::lockout::status).delete(admin::lockout::unlock),
        )
        .route(
            "/admin/sessions/families/{id}/revoke",
            post(admin::sessions::revoke_family),
        )
        .route("/admin/rate-limits/reset", post(admin::rate_limits::reset))
        .route("/admin/jobs/dead-letter", get(admin::jobs::dead_letters))
        .route("/admin/jobs/stats", get(admin::jobs::stats))
        .route("/admin/jobs/{id}/requeue", post(admin::jobs::requeue))
        .route("/admin/audit", get(admin::audit::query))
        .route(
            "/admin/tenants",
            get(admin::tenants::list).post(admin::tenants::create),
        )
        .route("/admin/tenants/{id}/suspend", post(admin::tenants::suspend))
        .route(
            "/admin/tenants/{id}/reactivate",
            post(admin::tenants::reactivate),
        )
        // Outermost first: request id -> trace -> timeout -> gateway -> body limit
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(app_middleware::request_id))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            let request_id = req
                                .extensions()
                                .get::<app_middleware::RequestId>()
                                .map(|id| id.0.as_str())
                                .unwrap_or("");
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri().path(),
                                http.status_code = tracing::field::Empty,
                                request_id = %request_id
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>,
                             latency: std::time::Duration,
                             span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(TimeoutLayer::new(request_timeout))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    app_middleware::gateway,
                ))
                .layer(axum::extract::DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

pub struct AegisServer {
    addr: SocketAddr,
    state: AppState,
}

impl AegisServer {
    pub fn new(state: AppState) -> Self {
        Self {
            addr: state.config.addr(),
            state,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Serves until Ctrl+C or SIGTERM, then stops the background tasks and
    /// waits for them.
    pub async fn run(self) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        let tasks: Vec<JoinHandle<()>> = maintenance::start_all(&self.state, cancel.clone())?;

        let app = build_router(self.state);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        cancel.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
