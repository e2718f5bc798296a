use crate::config::Config;
use crate::config_validator::ConfigValidator;
use crate::error::ApiError;
use crate::handlers::{
    admin_consent_form_url, admin_me, admin_preregistrations, admin_registrations, auto_verify_email,
    create_user_verified, get_registration, preregister, register, registration_status, root,
    send_google_signup_email, update_registration, upload_consent_form, AppState, SharedState,
};
use crate::health::{database_health_check, health_check};
use crate::key_generator::KeyStrategy;
use crate::middleware::{ip_admission, logging_middleware, user_admission, IpTierGuard, UserTierGuard};
use crate::rate_limit_config::{RateLimitConfig, Tier};
use crate::rate_limiter::RateLimiter;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, patch, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Request body cap for multipart uploads (5 MiB document plus form fields)
pub const UPLOAD_BODY_LIMIT: usize = 6 * 1024 * 1024;

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
    rate_limiter: RateLimiter,
    sweep_interval: Duration,
}

impl Server {
    pub fn new(config: Config) -> Result<Self, ApiError> {
        ConfigValidator::validate_config(&config)?;

        let rate_limits = RateLimitConfig::default();
        ConfigValidator::validate_rate_limits(&rate_limits)?;
        let rate_limiter = RateLimiter::new(rate_limits);

        let state = AppState::from_config(&config, rate_limiter.clone())
            .map_err(|e| ApiError::Configuration(format!("failed to build HTTP clients: {}", e)))?;
        let app = create_app(Arc::new(state), &config.cors_origin_list());

        Ok(Self {
            app,
            bind_addr: config.bind_addr,
            rate_limiter,
            sweep_interval: config.sweep_interval(),
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        let sweeper = self.rate_limiter.spawn_sweeper(self.sweep_interval);

        tracing::info!("Registration server listening on {}", self.bind_addr);
        tracing::info!("Health check available at /api/health");

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        sweeper.abort();
        Ok(())
    }
}

/// Attach the admission layer for `tier`, keyed the way the tier identifies
/// callers. Route layers run before extractors and handlers.
fn admitted(routes: Router<SharedState>, state: &SharedState, tier: Tier) -> Router<SharedState> {
    match KeyStrategy::for_tier(tier) {
        KeyStrategy::IpAddress => routes.route_layer(middleware::from_fn_with_state(
            IpTierGuard {
                limiter: state.rate_limiter.clone(),
                tier,
            },
            ip_admission,
        )),
        KeyStrategy::UserId => routes.route_layer(middleware::from_fn_with_state(
            UserTierGuard {
                state: state.clone(),
                tier,
            },
            user_admission,
        )),
    }
}

/// Build the router with one admission-guarded group per tier.
pub fn create_app(state: SharedState, cors_origins: &[String]) -> Router {
    let strict = admitted(
        Router::new()
            .route("/create-user-verified", post(create_user_verified))
            .route("/auto-verify-email", post(auto_verify_email))
            .route("/preregister", post(preregister)),
        &state,
        Tier::Strict,
    );

    let standard = admitted(
        Router::new()
            .route("/register", post(register))
            .route("/registration", patch(update_registration))
            .route("/registration/consent-form", post(upload_consent_form)),
        &state,
        Tier::Standard,
    )
    .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT));

    let admin = admitted(
        Router::new()
            .route("/admin/me", get(admin_me))
            .route("/admin/registrations", get(admin_registrations))
            .route("/admin/preregistrations", get(admin_preregistrations))
            .route("/admin/consent-form-url", get(admin_consent_form_url)),
        &state,
        Tier::Admin,
    );

    let email = admitted(
        Router::new().route("/send-google-signup-email", post(send_google_signup_email)),
        &state,
        Tier::Email,
    );

    let open = Router::new()
        .route("/", get(root))
        .route("/registration", get(get_registration))
        .route("/registration/status", get(registration_status))
        .route("/health", get(health_check))
        .route("/health/db", get(database_health_check));

    let api = Router::new()
        .merge(open)
        .merge(strict)
        .merge(standard)
        .merge(admin)
        .merge(email);

    Router::new()
        .route("/", get(root))
        .nest("/api", api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origins))
                .layer(middleware::from_fn(logging_middleware)),
        )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
