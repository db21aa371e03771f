use std::net::SocketAddr;
use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use crate::state::AppState;
use crate::{auth, segmentation, strategies};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest("/api",
              Router::new()
                  .merge(auth::router())
                  .merge(segmentation::router())
                  .merge(strategies::router())
        )
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
        .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::generation::{client::stub::StubGenerator, GenerationClient};

    const BOUNDARY: &str = "marketwise-test-boundary";

    const UPLOAD: &str = "CustomerID;Quantity;UnitPrice;InvoiceNo;Country\n\
                          1;2;10,50;INV1;BR\n\
                          1;1;5,00;INV2;BR\n\
                          2;3;7,25;INV3;BR\n";

    const TWO_SEGMENTS: &str = r#"{
        "textualInsights": "One repeat buyer and one single-order buyer.",
        "segments": [
            {"name": "Repeat", "size": 1, "avg_purchase_value": 13.0, "purchase_frequency": 2.0, "description": "two invoices"},
            {"name": "Single", "size": 1, "avg_purchase_value": 21.75, "purchase_frequency": 1.0, "description": "one invoice"}
        ]
    }"#;

    async fn app_with(stub: Arc<StubGenerator>) -> Router {
        let state = AppState::fake(stub as Arc<dyn GenerationClient>).await;
        build_app(state)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    fn multipart_body(fields: &[(&str, &str)], file: &str) -> String {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"sales.csv\"\r\n\
             Content-Type: text/csv\r\n\r\n{file}\r\n--{BOUNDARY}--\r\n"
        ));
        body
    }

    async fn register_and_login(app: &Router, email: &str, password: &str) -> String {
        let (status, _, _) = send(
            app,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({ "email": email, "password": password }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let form = format!("username={}&password={}", email.replace('@', "%40"), password);
        let (status, _, body) = send(
            app,
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");
        body["access_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health() {
        let app = app_with(Arc::new(StubGenerator::replying("{}"))).await;
        let res = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn upload_to_history_end_to_end() {
        let stub = Arc::new(StubGenerator::replying(TWO_SEGMENTS));
        let app = app_with(stub.clone()).await;
        let token = register_and_login(&app, "a@x.com", "pw123").await;

        let body = multipart_body(
            &[("numberOfClusters", "2"), ("normalize", "true"), ("excludeNulls", "false")],
            UPLOAD,
        );
        let req = Request::builder()
            .method("POST")
            .uri("/api/segmentation-insights")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, _, insights) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(insights["segments"].as_array().unwrap().len(), 2);
        assert!(insights["textualInsights"].is_string());

        let prompt = stub.last_prompt().unwrap();
        assert!(prompt.contains("CustomerID,Monetary,Frequency,TotalQuantity,Country"));
        assert!(prompt.contains("1,26.00,2,3,BR"));
        assert!(prompt.contains("2,21.75,1,3,BR"));
        assert!(prompt.contains("exactly 2 potential market segments"));

        let (status, _, list) = send(&app, get_request("/api/segmentation-analyses", &token)).await;
        assert_eq!(status, StatusCode::OK);
        let list = list.as_array().unwrap().clone();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["number_of_clusters"], 2);

        let id = list[0]["id"].as_i64().unwrap();
        assert_eq!(insights["analysisId"], id);
        let (status, _, details) = send(
            &app,
            get_request(&format!("/api/segmentation-analyses/{id}"), &token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(details["segments"].as_array().unwrap().len(), 2);
        assert_eq!(details["segments"][1]["avg_purchase_value"], 21.75);
        assert_eq!(details["dataTreatment"]["normalize"], true);

        // another user sees nothing
        let other = register_and_login(&app, "b@x.com", "pw456").await;
        let (status, _, list) = send(&app, get_request("/api/segmentation-analyses", &other)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(list.as_array().unwrap().is_empty());
        let (status, _, _) = send(
            &app,
            get_request(&format!("/api/segmentation-analyses/{id}"), &other),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn json_insight_request() {
        let stub = Arc::new(StubGenerator::replying(TWO_SEGMENTS));
        let app = app_with(stub.clone()).await;
        let token = register_and_login(&app, "a@x.com", "pw123").await;

        let payload = json!({
            "clusterData": "CustomerID,Monetary\n1,26.00",
            "dataTreatment": { "normalize": false, "excludeNulls": true, "groupCategories": false },
            "numberOfClusters": 2
        });
        let (status, _, body) = send(
            &app,
            json_request("POST", "/api/segmentation-insights", Some(&token), payload),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["segments"][0]["name"], "Repeat");
    }

    #[tokio::test]
    async fn bad_generation_output_is_500_without_raw_text() {
        let stub = Arc::new(StubGenerator::replying("SECRET not json"));
        let app = app_with(stub).await;
        let token = register_and_login(&app, "a@x.com", "pw123").await;

        let payload = json!({
            "clusterData": "a,b\n1,2",
            "dataTreatment": { "normalize": false, "excludeNulls": false, "groupCategories": false },
            "numberOfClusters": 2
        });
        let (status, _, body) = send(
            &app,
            json_request("POST", "/api/segmentation-insights", Some(&token), payload),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body["detail"].as_str().unwrap().contains("SECRET"));
    }

    #[tokio::test]
    async fn schema_violation_is_500_without_model_text() {
        let stub = Arc::new(StubGenerator::sequence(vec![
            Ok(r#"{"marketingStrategies":"SECRET-MODEL-TEXT"}"#.into()),
            Ok(r#"{"textualInsights":"t","segments":[{"name":"SECRET-NAME","size":-1,"avg_purchase_value":1,"purchase_frequency":1,"description":"d"}]}"#.into()),
        ]));
        let app = app_with(stub).await;

        let (status, _, body) = send(
            &app,
            json_request(
                "POST",
                "/api/marketing-strategies",
                None,
                json!({
                    "customerSegmentAttributes": "Young urban professionals",
                    "campaignObjectives": "Increase repeat purchases"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body["detail"].as_str().unwrap().contains("SECRET"));

        let token = register_and_login(&app, "a@x.com", "pw123").await;
        let payload = json!({
            "clusterData": "a,b\n1,2",
            "dataTreatment": { "normalize": false, "excludeNulls": false, "groupCategories": false },
            "numberOfClusters": 1
        });
        let (status, _, body) = send(
            &app,
            json_request("POST", "/api/segmentation-insights", Some(&token), payload),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body["detail"].as_str().unwrap().contains("SECRET"));
    }

    #[tokio::test]
    async fn upstream_failure_is_502() {
        let stub = Arc::new(StubGenerator::failing("quota"));
        let app = app_with(stub).await;

        let (status, _, body) = send(
            &app,
            json_request(
                "POST",
                "/api/marketing-strategies",
                None,
                json!({
                    "customerSegmentAttributes": "Young urban professionals",
                    "campaignObjectives": "Increase repeat purchases"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn protected_routes_require_token() {
        let stub = Arc::new(StubGenerator::replying(TWO_SEGMENTS));
        let app = app_with(stub.clone()).await;

        let (status, headers, body) = send(
            &app,
            Request::builder()
                .uri("/api/segmentation-analyses")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(headers[header::WWW_AUTHENTICATE], "Bearer");
        assert!(body["detail"].is_string());

        let (status, _, _) = send(&app, get_request("/api/auth/me", "not-a-token")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) = send(
            &app,
            json_request(
                "POST",
                "/api/segmentation-insights",
                None,
                json!({ "clusterData": "x", "dataTreatment": {}, "numberOfClusters": 1 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn strategies_are_public_and_validated() {
        let stub = Arc::new(StubGenerator::sequence(vec![Ok(
            r#"{"marketingStrategies":["Loyalty points","Bundle offers"]}"#.into(),
        )]));
        let app = app_with(stub.clone()).await;

        let (status, _, body) = send(
            &app,
            json_request(
                "POST",
                "/api/marketing-strategies",
                None,
                json!({ "customerSegmentAttributes": "short", "campaignObjectives": "Increase repeat purchases" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("customerSegmentAttributes"));
        assert_eq!(stub.calls(), 0);

        let (status, _, body) = send(
            &app,
            json_request(
                "POST",
                "/api/marketing-strategies",
                None,
                json!({
                    "customerSegmentAttributes": "Young urban professionals",
                    "campaignObjectives": "Increase repeat purchases"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["marketingStrategies"][1], "Bundle offers");
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let app = app_with(Arc::new(StubGenerator::replying("{}"))).await;
        register_and_login(&app, "a@x.com", "pw123").await;

        let (status, _, body) = send(
            &app,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({ "email": "A@X.com", "password": "other" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"], "Email already registered");
    }

    #[tokio::test]
    async fn profile_round_trip() {
        let app = app_with(Arc::new(StubGenerator::replying("{}"))).await;
        let token = register_and_login(&app, "a@x.com", "pw123").await;

        let (status, _, body) = send(
            &app,
            json_request(
                "PUT",
                "/api/auth/profile",
                Some(&token),
                json!({ "name": "Ana", "avatar_url": "https://cdn.example.com/a.png" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Ana");

        let (status, _, me) = send(&app, get_request("/api/auth/me", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "a@x.com");
        assert_eq!(me["avatar_url"], "https://cdn.example.com/a.png");
        assert!(me.get("password_hash").is_none());
    }
}
