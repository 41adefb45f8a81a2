#![allow(clippy::needless_for_each)]

use crate::auth::{Authenticator, RoutePolicy, RouteGuard, guard};
use anyhow::Result;
use axum::{
    Extension, Json, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    response::IntoResponse,
    routing::{MethodRouter, delete, get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;
use utoipa::OpenApi;

pub(crate) mod handlers;

use handlers::{
    health, health::__path_health, session, session::__path_create_session,
    session::__path_delete_session, token, token::__path_mint_token, whoami,
    whoami::__path_whoami,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(OpenApi)]
#[openapi(
    paths(health, whoami, create_session, delete_session, mint_token),
    components(schemas(
        health::Health,
        whoami::WhoAmI,
        session::SessionCreated,
        token::MintRequest,
        token::MintedToken,
        handlers::ErrorBody,
        crate::store::Actor,
        crate::auth::ActorDescriptor,
    )),
    tags(
        (name = "warden", description = "Authentication gateway API")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

async fn openapi_json() -> impl IntoResponse {
    Json(openapi())
}

/// Attach the authentication guard for `policy` to a method router.
fn guarded(
    authenticator: &Arc<Authenticator>,
    policy: RoutePolicy,
    route: MethodRouter,
) -> MethodRouter {
    route.route_layer(middleware::from_fn_with_state(
        RouteGuard::new(authenticator.clone(), policy),
        guard,
    ))
}

/// Build the application router. Every route declares its own policy.
#[must_use]
pub fn router(authenticator: Arc<Authenticator>) -> Router {
    Router::new()
        .route("/health", get(handlers::health).options(handlers::health))
        .route("/openapi.json", get(openapi_json))
        .route(
            "/v1/whoami",
            guarded(
                &authenticator,
                RoutePolicy::required(),
                get(handlers::whoami),
            ),
        )
        .route(
            "/v1/session",
            guarded(
                &authenticator,
                RoutePolicy::optional_without_xsrf(),
                post(handlers::create_session),
            ),
        )
        .route(
            "/v1/session",
            guarded(
                &authenticator,
                RoutePolicy::optional(),
                delete(handlers::delete_session),
            ),
        )
        .route(
            "/v1/tokens",
            guarded(
                &authenticator,
                RoutePolicy::admin_only(),
                post(handlers::mint_token),
            ),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID_HEADER),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID_HEADER,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(authenticator)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, authenticator: Arc<Authenticator>) -> Result<()> {
    let app = router(authenticator);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {err}");
                std::future::pending::<()>().await;
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
