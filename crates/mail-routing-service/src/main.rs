use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use mail_routing_api::{
    ExplainRequest, MailRoutingApi, Registry, Report, API_CONTRACT_VERSION,
};
use mail_routing_core::{DeliveryExplanation, MailInspection, RoutingExplanation};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const DEFAULT_LOG_FILTER: &str = "warn";

/// Body of every explain route. Keeping the rejection lets malformed snapshots
/// answer with the same error envelope as api failures.
type ExplainBody = std::result::Result<Json<ExplainRequest>, JsonRejection>;

#[derive(Debug, Clone)]
struct ServiceState {
    api: MailRoutingApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T> {
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

impl<T> ServiceEnvelope<T> {
    fn wrap(data: T) -> Self {
        Self {
            service_contract_version: SERVICE_CONTRACT_VERSION,
            api_contract_version: API_CONTRACT_VERSION,
            data,
        }
    }
}

impl<T> IntoResponse for ServiceEnvelope<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[derive(Debug)]
enum ServiceError {
    /// The body could not be decoded into an `ExplainRequest`.
    MalformedRequest(String),
    /// The request decoded but the api refused it.
    Rejected(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    service_contract_version: &'static str,
    error: String,
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        Self::MalformedRequest(rejection.body_text())
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        Self::Rejected(format!("{err:#}"))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let error = match self {
            Self::MalformedRequest(message) => {
                tracing::debug!(error = %message, "malformed explain request");
                message
            }
            Self::Rejected(message) => {
                tracing::debug!(error = %message, "explain request rejected");
                message
            }
        };
        let body = ErrorBody { service_contract_version: SERVICE_CONTRACT_VERSION, error };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "mail-routing-service")]
#[command(about = "Local HTTP service explaining recorded mail delivery and routing")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/registry", get(registry))
        .route("/v1/mail/delivery", post(mail_delivery))
        .route("/v1/mail/routing", post(mail_routing))
        .route("/v1/mail/inspect", post(mail_inspect))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();
    let state = ServiceState { api: MailRoutingApi::new() };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "mail routing service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> ServiceEnvelope<HealthResponse> {
    ServiceEnvelope::wrap(HealthResponse { status: "ok" })
}

async fn registry(State(state): State<ServiceState>) -> ServiceEnvelope<Registry> {
    ServiceEnvelope::wrap(state.api.registry())
}

async fn mail_delivery(
    State(state): State<ServiceState>,
    body: ExplainBody,
) -> Result<ServiceEnvelope<Report<DeliveryExplanation>>, ServiceError> {
    let Json(request) = body?;
    Ok(ServiceEnvelope::wrap(state.api.explain_delivery(&request)?))
}

async fn mail_routing(
    State(state): State<ServiceState>,
    body: ExplainBody,
) -> Result<ServiceEnvelope<Report<RoutingExplanation>>, ServiceError> {
    let Json(request) = body?;
    Ok(ServiceEnvelope::wrap(state.api.explain_routing(&request)?))
}

async fn mail_inspect(
    State(state): State<ServiceState>,
    body: ExplainBody,
) -> Result<ServiceEnvelope<Report<MailInspection>>, ServiceError> {
    let Json(request) = body?;
    Ok(ServiceEnvelope::wrap(state.api.inspect(&request)?))
}
