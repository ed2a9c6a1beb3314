//! Identity service: invitation lifecycle, second-factor provisioning and
//! service-role administration for the platform.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::IdentityConfig;
use crate::services::{Database, NotificationClient};
use service_core::error::AppError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub db: Database,
    pub notifier: NotificationClient,
}

/// Health check endpoint for liveness probes. Pings the database.
async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    state.db.health_check().await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": state.config.service_name,
            "version": env!("CARGO_PKG_VERSION")
        })),
    ))
}

/// Build the service router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/invites", post(handlers::invite::create_invite))
        .route(
            "/invites/:code",
            get(handlers::invite::get_invite).patch(handlers::invite::update_invite),
        )
        .route("/invites/:code/otp", post(handlers::invite::generate_otp))
        .route("/invites/:code/otp/send", post(handlers::invite::send_otp))
        .route(
            "/invites/:code/otp/reprovision",
            post(handlers::invite::reprovision_otp),
        )
        .route(
            "/invites/:code/otp/validate",
            post(handlers::invite::validate_otp),
        )
        .route(
            "/invites/:code/complete",
            post(handlers::invite::complete_invite),
        )
        .route(
            "/users/:external_id/second-factor",
            post(handlers::second_factor::provision_second_factor),
        )
        .route(
            "/users/:external_id/second-factor/activate",
            post(handlers::second_factor::activate_second_factor),
        )
        .route(
            "/users/:external_id/reset-login-counter",
            post(handlers::user::reset_login_counter),
        )
        .route("/auth/login", post(handlers::user::authenticate))
        .route(
            "/auth/second-factor",
            post(handlers::user::second_factor_authenticate),
        )
        .route(
            "/services/:service_external_id/users/:user_external_id/role",
            put(handlers::service_role::update_service_role),
        )
        .route(
            "/services/:service_external_id/users/:user_external_id",
            delete(handlers::service_role::remove_service_user),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application: connect the pool, run migrations, bind the
    /// listener (port 0 = random port for testing).
    pub async fn build(config: IdentityConfig) -> Result<Self, AppError> {
        let pool = db::create_pool(&config.database).await?;
        db::run_migrations(&pool).await?;

        let state = AppState {
            db: Database::new(pool),
            notifier: NotificationClient::new(config.notification.base_url.clone()),
            config,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], state.config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Identity service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a handle to the database wrapper.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);
        axum::serve(self.listener, router).await
    }
}
