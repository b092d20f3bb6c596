//! simpay HTTP Server
//!
//! Axum-based server exposing the payment form REST routes.

mod config;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use simpay_core::{FormRepository, HookRegistry, MemoryFormRepository};
use simpay_payments::StripeGateway;

use crate::config::ServerConfig;
use crate::handlers::{
    confirm_payment_intent, create_customer, create_payment_intent, form_config, health_check,
    license_status, not_found,
};
use crate::state::AppState;

/// Build the router
pub fn app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Payment form flow
        .route("/wpsp/v2/customer", post(create_customer))
        .route("/wpsp/v2/paymentintent/create", post(create_payment_intent))
        .route("/wpsp/v2/paymentintent/confirm", post(confirm_payment_intent))
        // Form rendering
        .route("/wpsp/v2/form/{id}", get(form_config))
        .route("/wpsp/v2/license", get(license_status))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn load_forms(config: &ServerConfig) -> anyhow::Result<MemoryFormRepository> {
    let json = match std::fs::read_to_string(&config.forms_path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("⚠ {} not found - no payment forms loaded", config.forms_path);
            return Ok(MemoryFormRepository::new());
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", config.forms_path)),
    };

    let mut forms = MemoryFormRepository::from_json(&json)?;
    forms.apply_credentials(&config.test_credentials, &config.live_credentials);
    Ok(forms)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env()?;

    let forms = load_forms(&config)?;
    tracing::info!("Loaded {} payment forms from {}:", forms.len(), config.forms_path);
    for form in forms.iter() {
        tracing::info!("  • #{} {} ({:?} mode)", form.id, form.title, form.api_mode());
    }

    if config.stripe_configured() {
        tracing::info!("✓ Stripe configured");
    } else {
        tracing::warn!("⚠ Stripe not configured - processor calls will fail");
        tracing::warn!("  Set STRIPE_TEST_SECRET_KEY or STRIPE_LIVE_SECRET_KEY in .env");
    }

    if config.license.is_lite() {
        tracing::info!("Running Lite edition - card payments only");
    } else {
        tracing::info!(
            "License {:?}, tier {:?}",
            config.license.status,
            config.license.tier()
        );
    }

    let state = AppState::new(
        &config,
        Arc::new(forms),
        Arc::new(StripeGateway::new()),
        Arc::new(HookRegistry::new()),
    )?;

    // Forget clients whose rate limit budget has refilled
    let limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(limiter.window());
        loop {
            ticker.tick().await;
            limiter.sweep();
        }
    });

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 simpay server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                        - Health check");
    tracing::info!("  GET  /wpsp/v2/form/{{id}}             - Form config + nonce");
    tracing::info!("  GET  /wpsp/v2/license               - License status");
    tracing::info!("  POST /wpsp/v2/customer              - Create/update Customer");
    tracing::info!("  POST /wpsp/v2/paymentintent/create  - Create PaymentIntent");
    tracing::info!("  POST /wpsp/v2/paymentintent/confirm - Confirm PaymentIntent");
    tracing::info!("");

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        extract::ConnectInfo,
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use simpay_core::{FormDefinition, FormField, PaymentMethodType, PostCallHook};
    use simpay_payments::{GatewayCall, MockGateway};
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn test_config(extra: &[(&str, &str)]) -> ServerConfig {
        let mut vars: HashMap<&str, &str> = HashMap::from([
            ("SIMPAY_NONCE_SECRET", "server-test-secret-0123456789"),
            ("STRIPE_TEST_SECRET_KEY", "sk_test_mock"),
        ]);
        vars.extend(extra.iter().copied());
        ServerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
    }

    fn forms(config: &ServerConfig) -> Arc<MemoryFormRepository> {
        let form = FormDefinition::new(1, "Donation", 2500)
            .with_field(FormField {
                key: "simpay_email".into(),
                label: "Email Address".into(),
                field_type: "email".into(),
                required: true,
                metadata: false,
            })
            .with_payment_methods(vec![PaymentMethodType::Card, PaymentMethodType::SepaDebit]);
        let mut forms = MemoryFormRepository::from_forms([form]);
        forms.apply_credentials(&config.test_credentials, &config.live_credentials);
        Arc::new(forms)
    }

    fn setup_with(config: ServerConfig, hooks: HookRegistry) -> (Router, MockGateway) {
        let gateway = MockGateway::new();
        let forms = forms(&config);
        let state = AppState::new(&config, forms, Arc::new(gateway.clone()), Arc::new(hooks)).unwrap();
        (app(state), gateway)
    }

    fn setup() -> (Router, MockGateway) {
        setup_with(test_config(&[]), HookRegistry::new())
    }

    const CLIENT: &str = "198.51.100.20:51000";

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        send_from(app, CLIENT, &[], method, uri, body).await
    }

    async fn send_from(
        app: &Router,
        peer: &str,
        headers: &[(&str, &str)],
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let peer: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn form_nonce(app: &Router) -> String {
        let (status, body) = send(app, "GET", "/wpsp/v2/form/1", None).await;
        assert_eq!(status, StatusCode::OK);
        body["form_nonce"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = setup();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["stripe_configured"], true);
        assert_eq!(body["forms"], 1);
    }

    #[tokio::test]
    async fn test_unknown_form() {
        let (app, _) = setup();
        let (status, body) = send(&app, "GET", "/wpsp/v2/form/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Unable to locate payment form.");
    }

    #[tokio::test]
    async fn test_card_payment_flow() {
        let (app, gateway) = setup();
        let nonce = form_nonce(&app).await;

        let (status, body) = send(
            &app,
            "POST",
            "/wpsp/v2/customer",
            Some(json!({
                "form_id": 1,
                "form_data": "{}",
                "form_values": {"simpay_email": "jo@example.com"},
                "form_nonce": nonce,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let customer_id = body["customer"]["id"].as_str().unwrap().to_string();
        let customer_nonce = body["nonce"].as_str().unwrap().to_string();
        assert!(!customer_nonce.is_empty());

        let intent_request = json!({
            "customer_id": customer_id,
            "customer_nonce": customer_nonce,
            "form_id": "1",
            "form_data": "{}",
            "form_values": {"simpay_email": "jo@example.com"},
            "form_nonce": nonce,
            "payment_method_id": "pm_123",
        });
        let (status, intent) = send(&app, "POST", "/wpsp/v2/paymentintent/create", Some(intent_request.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(intent["object"], "payment_intent");
        assert_eq!(intent["payment_method"], "pm_123");

        // The customer nonce is spent
        let (status, body) = send(&app, "POST", "/wpsp/v2/paymentintent/create", Some(intent_request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());

        let (status, confirmed) = send(
            &app,
            "POST",
            "/wpsp/v2/paymentintent/confirm",
            Some(json!({
                "payment_intent_id": intent["id"],
                "customer_id": customer_id,
                "customer_nonce": customer_nonce,
                "form_id": 1,
                "form_nonce": nonce,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(confirmed["status"], "succeeded");

        let calls = gateway.calls().await;
        assert_eq!(calls.len(), 3);
        let GatewayCall::CreatePaymentIntent(args) = &calls[1] else {
            panic!("expected a PaymentIntent create, got {:?}", calls[1]);
        };
        assert_eq!(args.get_str("customer"), Some(customer_id.as_str()));
        assert_eq!(args.get("payment_method_types"), Some(&json!(["card"])));
    }

    #[tokio::test]
    async fn test_missing_form_nonce() {
        let (app, gateway) = setup();
        let (status, body) = send(
            &app,
            "POST",
            "/wpsp/v2/customer",
            Some(json!({"form_id": 1, "form_values": {"simpay_email": "jo@example.com"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
        assert_eq!(gateway.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_required_field() {
        let (app, gateway) = setup();
        let nonce = form_nonce(&app).await;
        let (status, body) = send(
            &app,
            "POST",
            "/wpsp/v2/customer",
            Some(json!({"form_id": 1, "form_values": {}, "form_nonce": nonce})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Email Address is a required field.");
        assert_eq!(gateway.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_json_body() {
        let (app, _) = setup();
        let request = Request::builder()
            .method("POST")
            .uri("/wpsp/v2/customer")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let (app, _) = setup_with(test_config(&[("SIMPAY_RATE_LIMIT_MAX", "2")]), HookRegistry::new());
        for _ in 0..2 {
            let (status, _) = send(&app, "POST", "/wpsp/v2/customer", Some(json!({}))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        let (_, body) = send(&app, "POST", "/wpsp/v2/customer", Some(json!({}))).await;
        assert_eq!(body["message"], "Too many requests. Please try again in a few minutes.");
    }

    #[tokio::test]
    async fn test_forwarded_for_ignored_from_untrusted_peer() {
        let (app, _) = setup_with(test_config(&[("SIMPAY_RATE_LIMIT_MAX", "2")]), HookRegistry::new());
        for n in 1..=2 {
            let spoofed = format!("203.0.113.{n}");
            let headers = [("x-forwarded-for", spoofed.as_str()), ("x-real-ip", spoofed.as_str())];
            let (_, body) = send_from(&app, CLIENT, &headers, "POST", "/wpsp/v2/customer", Some(json!({}))).await;
            assert_ne!(body["message"], "Too many requests. Please try again in a few minutes.");
        }

        // A fresh forwarded address does not buy a fresh budget
        let headers = [("x-forwarded-for", "203.0.113.99")];
        let (_, body) = send_from(&app, CLIENT, &headers, "POST", "/wpsp/v2/customer", Some(json!({}))).await;
        assert_eq!(body["message"], "Too many requests. Please try again in a few minutes.");
    }

    #[tokio::test]
    async fn test_trusted_proxy_forwards_client() {
        let config = test_config(&[
            ("SIMPAY_RATE_LIMIT_MAX", "1"),
            ("SIMPAY_TRUSTED_PROXIES", "10.0.0.0/8"),
        ]);
        let (app, _) = setup_with(config, HookRegistry::new());
        let proxy = "10.0.0.1:443";
        let limited = json!("Too many requests. Please try again in a few minutes.");

        let first = [("x-forwarded-for", "203.0.113.7, 10.0.0.1")];
        let (_, body) = send_from(&app, proxy, &first, "POST", "/wpsp/v2/customer", Some(json!({}))).await;
        assert_ne!(body["message"], limited);

        // Each forwarded client has its own budget behind the proxy
        let (_, body) = send_from(&app, proxy, &[("x-real-ip", "203.0.113.8")], "POST", "/wpsp/v2/customer", Some(json!({}))).await;
        assert_ne!(body["message"], limited);

        let (_, body) = send_from(&app, proxy, &first, "POST", "/wpsp/v2/customer", Some(json!({}))).await;
        assert_eq!(body["message"], limited);
    }

    #[tokio::test]
    async fn test_customer_nonce_survives_failed_create() {
        let (app, gateway) = setup();
        let nonce = form_nonce(&app).await;
        let (_, customer) = send(
            &app,
            "POST",
            "/wpsp/v2/customer",
            Some(json!({"form_id": 1, "form_values": {"simpay_email": "jo@example.com"}, "form_nonce": nonce})),
        )
        .await;

        let mut intent_request = json!({
            "customer_id": customer["customer"]["id"],
            "customer_nonce": customer["nonce"],
            "form_id": 1,
            "form_nonce": nonce,
        });
        let (status, body) = send(&app, "POST", "/wpsp/v2/paymentintent/create", Some(intent_request.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "A Payment Method is required.");

        // The same nonce still authorizes the corrected request
        intent_request["payment_method_id"] = json!("pm_123");
        let (status, _) = send(&app, "POST", "/wpsp/v2/paymentintent/create", Some(intent_request.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, "POST", "/wpsp/v2/paymentintent/create", Some(intent_request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(gateway.call_count().await, 2);
    }

    #[tokio::test]
    async fn test_lite_blocks_sepa() {
        let (app, gateway) = setup();
        let nonce = form_nonce(&app).await;
        let (_, body) = send(
            &app,
            "POST",
            "/wpsp/v2/customer",
            Some(json!({"form_id": 1, "form_values": {"simpay_email": "jo@example.com"}, "form_nonce": nonce})),
        )
        .await;

        let (status, _) = send(
            &app,
            "POST",
            "/wpsp/v2/paymentintent/create",
            Some(json!({
                "customer_id": body["customer"]["id"],
                "customer_nonce": body["nonce"],
                "form_id": 1,
                "form_nonce": nonce,
                "payment_method_type": "sepa_debit",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        // Only the Customer reached the gateway
        assert_eq!(gateway.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_pro_license_allows_sepa() {
        let config = test_config(&[
            ("SIMPAY_LICENSE_KEY", "abcd-1234"),
            ("SIMPAY_LICENSE_STATUS", "valid"),
            ("SIMPAY_LICENSE_PRICE_ID", "3"),
        ]);
        let (app, gateway) = setup_with(config, HookRegistry::new());
        let nonce = form_nonce(&app).await;
        let (_, body) = send(
            &app,
            "POST",
            "/wpsp/v2/customer",
            Some(json!({"form_id": 1, "form_values": {"simpay_email": "jo@example.com"}, "form_nonce": nonce})),
        )
        .await;

        let (status, intent) = send(
            &app,
            "POST",
            "/wpsp/v2/paymentintent/create",
            Some(json!({
                "customer_id": body["customer"]["id"],
                "customer_nonce": body["nonce"],
                "form_id": 1,
                "form_nonce": nonce,
                "payment_method_type": "sepa_debit",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(intent["setup_future_usage"], "off_session");
        assert_eq!(gateway.call_count().await, 2);

        let (_, license) = send(&app, "GET", "/wpsp/v2/license", None).await;
        assert_eq!(license["valid"], true);
        assert_eq!(license["tiers"]["professional"], true);
        assert_eq!(license["tiers"]["ultimate"], false);
    }

    #[tokio::test]
    async fn test_failing_after_hook_keeps_response() {
        let mut hooks = HookRegistry::new();
        hooks.after(PostCallHook::AfterCustomer, "broken", |_, _| Err(anyhow::anyhow!("hook failed")));
        let (app, _) = setup_with(test_config(&[]), hooks);
        let nonce = form_nonce(&app).await;

        let (status, body) = send(
            &app,
            "POST",
            "/wpsp/v2/customer",
            Some(json!({"form_id": 1, "form_values": {"simpay_email": "jo@example.com"}, "form_nonce": nonce})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["customer"]["email"], "jo@example.com");
    }
}
