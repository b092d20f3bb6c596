//! HTTP Handlers

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use simpay_core::{FormDefinition, FormId, NonceIssuer, RawRequest, ResponseEnvelope};
use simpay_payments::{Comparison, LicenseReport, Tier, FORM_NONCE_ACTION, FORM_NONCE_LIFETIME};

use crate::state::AppState;

// ============================================================================
// Extractors
// ============================================================================

/// Client address used for rate limiting
///
/// The socket peer, unless the peer is a trusted proxy. Only then is the
/// first `X-Forwarded-For` entry (or `X-Real-IP`) believed.
#[derive(Clone, Copy, Debug)]
pub struct ClientIp(pub Option<IpAddr>);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let Some(peer) = peer.filter(|ip| state.is_trusted_proxy(*ip)) else {
            return Ok(Self(peer));
        };

        let forwarded = header_ip(parts, "x-forwarded-for").or_else(|| header_ip(parts, "x-real-ip"));
        Ok(Self(Some(forwarded.unwrap_or(peer))))
    }
}

/// First address in a proxy header
fn header_ip(parts: &Parts, name: &str) -> Option<IpAddr> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub stripe_configured: bool,
    pub forms: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct FormConfigResponse {
    pub form: FormDefinition,
    pub form_nonce: String,
}

#[derive(Serialize)]
pub struct LicenseResponse {
    #[serde(flatten)]
    pub license: LicenseReport,

    /// `tier → license is at least that tier`
    pub tiers: BTreeMap<&'static str, bool>,
}

fn envelope_response(envelope: ResponseEnvelope) -> Response {
    let status = StatusCode::from_u16(envelope.status).unwrap_or(StatusCode::BAD_REQUEST);
    (status, Json(envelope.body)).into_response()
}

fn raw_request(client: ClientIp, payload: Result<Json<Value>, JsonRejection>) -> Result<RawRequest, Response> {
    match payload {
        Ok(Json(body)) => Ok(RawRequest::from_value(body).with_client_ip(client.0)),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected request body");
            Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    message: "Invalid payment form submission.".into(),
                }),
            )
                .into_response())
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        stripe_configured: state.stripe_configured,
        forms: state.forms.len(),
    })
}

/// Create or update a Customer
pub async fn create_customer(
    State(state): State<AppState>,
    client: ClientIp,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    match raw_request(client, payload) {
        Ok(request) => envelope_response(state.customers.create(&request).await),
        Err(response) => response,
    }
}

/// Create a PaymentIntent for a Customer
pub async fn create_payment_intent(
    State(state): State<AppState>,
    client: ClientIp,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    match raw_request(client, payload) {
        Ok(request) => envelope_response(state.payment_intents.create(&request).await),
        Err(response) => response,
    }
}

/// Confirm a PaymentIntent
pub async fn confirm_payment_intent(
    State(state): State<AppState>,
    client: ClientIp,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    match raw_request(client, payload) {
        Ok(request) => envelope_response(state.payment_intents.confirm(&request).await),
        Err(response) => response,
    }
}

/// Public form configuration plus a fresh form nonce
pub async fn form_config(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<FormConfigResponse>, (StatusCode, Json<ErrorResponse>)> {
    let Some(form) = state.forms.get(FormId(id)) else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                message: "Unable to locate payment form.".into(),
            }),
        ));
    };

    Ok(Json(FormConfigResponse {
        form,
        form_nonce: state.nonces.issue(FORM_NONCE_ACTION, FORM_NONCE_LIFETIME),
    }))
}

/// License status and the tiers it reaches
pub async fn license_status(State(state): State<AppState>) -> Json<LicenseResponse> {
    let tiers = Tier::ALL
        .iter()
        .map(|tier| (tier.as_str(), state.license.is_pro(*tier, Comparison::Ge)))
        .collect();

    Json(LicenseResponse {
        license: state.license.report(),
        tiers,
    })
}

/// Fallback for unknown routes
pub async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "message": "Not found." })))
}
