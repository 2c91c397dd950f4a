use crate::config::Config;
use crate::deployments::DeploymentApi;
use crate::providers::direct::Direct;
use crate::providers::harbor::Harbor;
use crate::providers::Provider;
use crate::resolver::{resolve, Outcome};
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Clone)]
pub struct AppState<C> {
    pub config: Arc<Config>,
    pub client: C,
}

pub async fn readiness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub fn create_app<C: DeploymentApi>(config: Arc<Config>, client: C) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/webhooks/harbor", post(webhook_endpoint::<Harbor, C>))
        .route("/webhooks/direct", post(webhook_endpoint::<Direct, C>))
        .layer(middleware::from_fn(log_requests))
        .with_state(AppState { config, client })
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let request_start = Instant::now();

    let response = next.run(request).await;

    info!(
        "{} {} responded {} in {:?}",
        method,
        path,
        response.status(),
        request_start.elapsed()
    );
    response
}

/// Checks the Authorization header against the configured static token.
/// A missing header is a bad request; anything else that is not exactly
/// "Bearer <token>" is unauthorized.
fn authenticate(headers: &HeaderMap, expected_token: &str) -> Result<(), StatusCode> {
    let header_value = headers.get(AUTHORIZATION).ok_or(StatusCode::BAD_REQUEST)?;
    let token = header_value
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if token != expected_token {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

/// Webhook pipeline shared by all providers: authenticate, parse the
/// provider-specific payload, resolve each push event against the mapping
/// table. Events are processed synchronously in request context so a
/// mutation failure is always visible in the response.
async fn webhook_endpoint<P: Provider, C: DeploymentApi>(
    State(state): State<AppState<C>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(status) = authenticate(&headers, state.config.auth_token.expose_secret()) {
        return status.into_response();
    }

    let events = match P::parse(&body) {
        Ok(events) => events,
        Err(err) => {
            info!("Rejecting {} webhook: {}", P::NAME, err);
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"ok": false}))).into_response();
        }
    };

    for event in &events {
        info!(
            "Received {} webhook for repository {}",
            P::NAME,
            event.repository_full_name
        );
        match resolve(&state.config.mappings, event, P::NAME, &state.client).await {
            Ok(Outcome::Matched(mapping)) => {
                info!(
                    "Updated deployment {} in namespace {} to image {}",
                    mapping.deployment_name, mapping.namespace, event.image_reference
                );
            }
            Ok(Outcome::Unmatched) => {
                info!(
                    "No mapping matched repository {}, ignoring",
                    event.repository_full_name
                );
            }
            Err(err) => {
                info!("Error while updating deployment: {}", err);
                return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"ok": false})))
                    .into_response();
            }
        }
    }

    (StatusCode::OK, Json(json!({"ok": true}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImageMapping, Webserver};
    use crate::deployments::{Container, Deployment, FakeDeployments};
    use crate::secret_string::SecretString;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const PUSH_PAYLOAD: &str = r#"{
        "type": "PUSH_ARTIFACT",
        "occur_at": 1586922308,
        "operator": "admin",
        "event_data": {
            "resources": [{
                "digest": "sha256:8a9e9863dbb6e10edb5adfe917c00da84e1700fa76e7ed02476aa6e6fb8ee0d8",
                "tag": "v2",
                "resource_url": "cr.example.com/library/debian:v2"
            }],
            "repository": {
                "date_created": 1586922308,
                "name": "debian",
                "namespace": "library",
                "repo_full_name": "library/debian",
                "repo_type": "private"
            }
        }
    }"#;

    fn test_config(mappings: Vec<ImageMapping>) -> Arc<Config> {
        Arc::new(Config {
            webserver: Webserver { port: 8080 },
            auth_token: SecretString::new("abc1234".to_string()),
            mappings,
        })
    }

    fn debian_mapping(providers: &[&str]) -> ImageMapping {
        ImageMapping {
            image_name: "library/debian".to_string(),
            deployment_name: "test-deployment".to_string(),
            namespace: "default".to_string(),
            providers: providers.iter().map(|p| p.to_string()).collect(),
        }
    }

    async fn seeded_fake() -> FakeDeployments {
        let fake = FakeDeployments::new();
        fake.create_deployment(&Deployment {
            namespace: "default".to_string(),
            name: "test-deployment".to_string(),
            containers: vec![Container {
                name: "app".to_string(),
                image: "cr.example.com/library/debian:v1".to_string(),
            }],
        })
        .await
        .expect("Should create deployment");
        fake
    }

    fn webhook_request(path: &str, auth_header: Option<&str>, payload: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json");
        if let Some(value) = auth_header {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::from(payload.to_string())).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn stored_image(fake: &FakeDeployments) -> String {
        fake.get_deployment("default", "test-deployment")
            .await
            .expect("Should get deployment")
            .containers[0]
            .image
            .clone()
    }

    #[tokio::test]
    async fn test_harbor_push_updates_mapped_deployment() {
        let fake = seeded_fake().await;
        let app = create_app(test_config(vec![debian_mapping(&[])]), fake.clone());

        let response = app
            .oneshot(webhook_request(
                "/webhooks/harbor",
                Some("Bearer abc1234"),
                PUSH_PAYLOAD,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"ok":true}"#);
        assert_eq!(stored_image(&fake).await, "cr.example.com/library/debian:v2");
    }

    #[tokio::test]
    async fn test_unmatched_repository_is_acknowledged_without_update() {
        let fake = seeded_fake().await;
        let app = create_app(test_config(vec![debian_mapping(&[])]), fake.clone());

        let payload = PUSH_PAYLOAD.replace("library/debian", "other/image");
        let response = app
            .oneshot(webhook_request(
                "/webhooks/harbor",
                Some("Bearer abc1234"),
                &payload,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"ok":true}"#);
        assert_eq!(stored_image(&fake).await, "cr.example.com/library/debian:v1");
    }

    #[tokio::test]
    async fn test_missing_authorization_header_is_bad_request() {
        let fake = seeded_fake().await;
        let app = create_app(test_config(vec![debian_mapping(&[])]), fake.clone());

        let response = app
            .oneshot(webhook_request("/webhooks/harbor", None, PUSH_PAYLOAD))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "");
        assert_eq!(stored_image(&fake).await, "cr.example.com/library/debian:v1");
    }

    #[tokio::test]
    async fn test_wrong_token_is_unauthorized() {
        let fake = seeded_fake().await;
        let app = create_app(test_config(vec![debian_mapping(&[])]), fake.clone());

        for header in ["Bearer wrong", "Bearer ", "Bearer abc12345", "abc1234"] {
            let response = app
                .clone()
                .oneshot(webhook_request(
                    "/webhooks/harbor",
                    Some(header),
                    PUSH_PAYLOAD,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "header {:?}", header);
        }
        assert_eq!(stored_image(&fake).await, "cr.example.com/library/debian:v1");
    }

    #[tokio::test]
    async fn test_malformed_json_is_unprocessable() {
        let fake = seeded_fake().await;
        let app = create_app(test_config(vec![debian_mapping(&[])]), fake.clone());

        let response = app
            .oneshot(webhook_request(
                "/webhooks/harbor",
                Some("Bearer abc1234"),
                "{not json",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_string(response).await, r#"{"ok":false}"#);
        assert_eq!(stored_image(&fake).await, "cr.example.com/library/debian:v1");
    }

    #[tokio::test]
    async fn test_mutation_failure_is_unprocessable() {
        // Mapping points at a deployment the backend does not have
        let fake = FakeDeployments::new();
        let app = create_app(test_config(vec![debian_mapping(&[])]), fake);

        let response = app
            .oneshot(webhook_request(
                "/webhooks/harbor",
                Some("Bearer abc1234"),
                PUSH_PAYLOAD,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_string(response).await, r#"{"ok":false}"#);
    }

    #[tokio::test]
    async fn test_ignored_harbor_event_type_is_acknowledged() {
        let fake = seeded_fake().await;
        let app = create_app(test_config(vec![debian_mapping(&[])]), fake.clone());

        let payload = PUSH_PAYLOAD.replace("PUSH_ARTIFACT", "SCANNING_COMPLETED");
        let response = app
            .oneshot(webhook_request(
                "/webhooks/harbor",
                Some("Bearer abc1234"),
                &payload,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(stored_image(&fake).await, "cr.example.com/library/debian:v1");
    }

    #[tokio::test]
    async fn test_provider_gated_mapping_ignores_other_providers() {
        let fake = seeded_fake().await;
        let app = create_app(test_config(vec![debian_mapping(&["direct"])]), fake.clone());

        let response = app
            .oneshot(webhook_request(
                "/webhooks/harbor",
                Some("Bearer abc1234"),
                PUSH_PAYLOAD,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(stored_image(&fake).await, "cr.example.com/library/debian:v1");
    }

    #[tokio::test]
    async fn test_direct_webhook_updates_mapped_deployment() {
        let fake = seeded_fake().await;
        let app = create_app(test_config(vec![debian_mapping(&["direct"])]), fake.clone());

        let payload = r#"{
            "repository_name": "library/debian",
            "image_url": "cr.example.com/library/debian:v3"
        }"#;
        let response = app
            .oneshot(webhook_request(
                "/webhooks/direct",
                Some("Bearer abc1234"),
                payload,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"ok":true}"#);
        assert_eq!(stored_image(&fake).await, "cr.example.com/library/debian:v3");
    }

    #[tokio::test]
    async fn test_same_payload_twice_is_idempotent() {
        let fake = seeded_fake().await;
        let app = create_app(test_config(vec![debian_mapping(&[])]), fake.clone());

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(webhook_request(
                    "/webhooks/harbor",
                    Some("Bearer abc1234"),
                    PUSH_PAYLOAD,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(stored_image(&fake).await, "cr.example.com/library/debian:v2");
        }
    }

    #[tokio::test]
    async fn test_health_probes() {
        let app = create_app(test_config(vec![]), FakeDeployments::new());

        for path in ["/health/live", "/health/ready"] {
            let request = Request::builder()
                .method("GET")
                .uri(path)
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
    }
}
