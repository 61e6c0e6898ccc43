mod router {
    use std::{net::SocketAddr, path::Path, sync::Arc};

    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        response::Response,
        Router,
    };
    use heartrisk_assistant::{AssistantConfig, AssistantProxy, FALLBACK_REPLY};
    use heartrisk_inference::{
        Classifier, EstimatorError, InferenceInvoker, LoadedModel, ProbabilisticClassifier,
        FEATURE_ORDER, HEART_DISEASE_MESSAGE, NO_HEART_DISEASE_MESSAGE,
    };
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tower::Service;

    use crate::{
        config::HeartRiskServiceConfig,
        error::StartupError,
        handlers::predict::PredictResponse,
        server::{build_app_state, cors_layer, create_router, AppState},
    };

    const ALLOWED_ORIGIN: &str = "http://localhost:3000";

    struct FixedLabel(i64);

    impl Classifier for FixedLabel {
        fn num_features(&self) -> usize {
            10
        }

        fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<i64>, EstimatorError> {
            Ok(rows.iter().map(|_| self.0).collect())
        }
    }

    struct FixedProba([f64; 2]);

    impl Classifier for FixedProba {
        fn num_features(&self) -> usize {
            10
        }

        fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<i64>, EstimatorError> {
            Ok(rows.iter().map(|_| i64::from(self.0[1] > 0.5)).collect())
        }
    }

    impl ProbabilisticClassifier for FixedProba {
        fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<[f64; 2]>, EstimatorError> {
            Ok(rows.iter().map(|_| self.0).collect())
        }
    }

    struct Failing;

    impl Classifier for Failing {
        fn num_features(&self) -> usize {
            10
        }

        fn predict(&self, _rows: &[Vec<f64>]) -> Result<Vec<i64>, EstimatorError> {
            Err(EstimatorError::Other("estimator state corrupted".to_string()))
        }
    }

    struct Panicking;

    impl Classifier for Panicking {
        fn num_features(&self) -> usize {
            10
        }

        fn predict(&self, _rows: &[Vec<f64>]) -> Result<Vec<i64>, EstimatorError> {
            panic!("estimator panicked");
        }
    }

    /// Returns an address nothing listens on.
    async fn closed_address() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    fn assistant_config(address: SocketAddr) -> AssistantConfig {
        AssistantConfig {
            endpoint_url: format!("http://{address}/v1/chat/completions"),
            model: "test-model".to_string(),
            temperature: 0.7,
            max_tokens: 64,
            request_timeout_ms: 2_000,
        }
    }

    async fn setup_router(model: LoadedModel) -> Router {
        let assistant =
            AssistantProxy::new(assistant_config(closed_address().await), "test-key".to_string())
                .unwrap();
        let app_state = AppState {
            invoker: InferenceInvoker::new(model),
            assistant: Arc::new(assistant),
        };
        create_router(app_state, cors_layer(&[ALLOWED_ORIGIN.to_string()]).unwrap())
    }

    fn scenario_a() -> Value {
        json!({
            "age": 63, "cp": 3, "trestbps": 145, "chol": 233, "restecg": 0,
            "thalach": 150, "oldpeak": 2.3, "slope": 0, "ca": 0, "thal": 1
        })
    }

    fn model_artifact(kind: &str) -> Value {
        let names: Vec<&str> = FEATURE_ORDER.iter().map(|f| f.wire_name()).collect();
        json!({
            "feature_names": names,
            "scaler": {
                "mean": [54.0, 1.0, 131.0, 246.0, 0.5, 150.0, 1.0, 1.4, 0.7, 2.3],
                "scale": [9.0, 1.0, 17.5, 51.8, 0.5, 22.9, 1.2, 0.6, 1.0, 0.6]
            },
            "estimator": {
                "kind": kind,
                "coefficients": [-0.1, 0.8, -0.3, -0.2, 0.2, 0.5, -0.6, 0.4, -0.8, -0.6],
                "intercept": 0.1
            }
        })
    }

    fn write_artifact(dir: &Path, artifact: &Value) -> std::path::PathBuf {
        let path = dir.join("heart_model.json");
        std::fs::write(&path, serde_json::to_vec(artifact).unwrap()).unwrap();
        path
    }

    fn service_config(model_artifact_path: std::path::PathBuf) -> HeartRiskServiceConfig {
        HeartRiskServiceConfig {
            service_bind_address: "127.0.0.1:0".to_string(),
            model_artifact_path,
            allowed_origins: vec![ALLOWED_ORIGIN.to_string()],
            assistant: assistant_config("127.0.0.1:9".parse().unwrap()),
        }
    }

    async fn send(router: &mut Router, request: Request<Body>) -> Response {
        router.call(request).await.unwrap()
    }

    fn post_json(path: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("Failed to read body")
            .to_vec()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_predict_with_probabilities() {
        let mut router = setup_router(LoadedModel::LabelWithProbability(Arc::new(
            FixedProba([0.2, 0.8]),
        )))
        .await;

        let response = send(&mut router, post_json("/predict", &scenario_a())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: PredictResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(
            body,
            PredictResponse {
                prediction: 1,
                proba: Some(vec![0.2, 0.8]),
                message: HEART_DISEASE_MESSAGE.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_predict_label_only_model_has_null_proba() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(0)))).await;

        let response = send(&mut router, post_json("/predict", &scenario_a())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["prediction"], json!(0));
        assert_eq!(body["proba"], Value::Null);
        assert_eq!(body["message"], json!(NO_HEART_DISEASE_MESSAGE));
    }

    #[tokio::test]
    async fn test_predict_with_loaded_artifact() {
        let dir = tempdir().unwrap();
        let path = write_artifact(dir.path(), &model_artifact("logistic_regression"));
        let app_state = build_app_state(&service_config(path), Some("key".to_string())).unwrap();
        let mut router = create_router(app_state, cors_layer(&[]).unwrap());

        let response = send(&mut router, post_json("/predict", &scenario_a())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: PredictResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        let proba = body.proba.expect("logistic regression estimates probabilities");
        assert_eq!(proba.len(), 2);
        assert!((proba[0] + proba[1] - 1.0).abs() < 1e-9);
        assert_eq!(u8::from(proba[1] > 0.5), body.prediction);
    }

    #[tokio::test]
    async fn test_predict_out_of_range_age_is_rejected() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(1)))).await;
        let mut record = scenario_a();
        record["age"] = json!(150);

        let response = send(&mut router, post_json("/predict", &record)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
        let message = body["error"]["message"].as_str().unwrap();
        assert!(message.contains("age"));
        assert!(message.contains("[0, 120]"));
    }

    #[tokio::test]
    async fn test_predict_low_blood_pressure_is_rejected() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(1)))).await;
        let mut record = scenario_a();
        record["trestbps"] = json!(85);

        let response = send(&mut router, post_json("/predict", &record)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("trestbps"));
    }

    #[tokio::test]
    async fn test_predict_fractional_integer_field_is_rejected() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(1)))).await;
        let mut record = scenario_a();
        record["age"] = json!(63.5);

        let response = send(&mut router, post_json("/predict", &record)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!("INVALID_BODY"));
    }

    #[tokio::test]
    async fn test_predict_missing_field_is_rejected() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(1)))).await;
        let mut record = scenario_a();
        record.as_object_mut().unwrap().remove("thal");

        let response = send(&mut router, post_json("/predict", &record)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], json!("INVALID_BODY"));
    }

    fn post_raw(path: &str, content_type: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder().method(Method::POST).uri(path);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_predict_malformed_json_is_invalid_body() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(1)))).await;

        let request = post_raw("/predict", Some("application/json"), "{not json");
        let response = send(&mut router, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!("INVALID_BODY"));
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request body"));
    }

    #[tokio::test]
    async fn test_predict_without_content_type_is_invalid_body() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(1)))).await;

        let request = post_raw("/predict", None, &scenario_a().to_string());
        let response = send(&mut router, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], json!("INVALID_BODY"));
    }

    #[tokio::test]
    async fn test_chat_malformed_json_is_invalid_body() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(0)))).await;

        let request = post_raw("/chat", Some("application/json"), "{\"message\": ");
        let response = send(&mut router, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], json!("INVALID_BODY"));
    }

    #[tokio::test]
    async fn test_predict_contract_violation_is_internal_error() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(2)))).await;

        let response = send(&mut router, post_json("/predict", &scenario_a())).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!("MODEL_CONTRACT_ERROR"));
        assert_eq!(body["error"]["message"], json!("Prediction failed"));
    }

    #[tokio::test]
    async fn test_predict_model_failure_is_internal_error() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(Failing))).await;

        let response = send(&mut router, post_json("/predict", &scenario_a())).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!("INFERENCE_ERROR"));
        let message = body["error"]["message"].as_str().unwrap();
        assert_eq!(message, "Prediction failed");
        assert!(!message.contains("corrupted"));
    }

    #[tokio::test]
    async fn test_handler_panic_is_internal_error() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(Panicking))).await;

        let response = send(&mut router, post_json("/predict", &scenario_a())).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!("INTERNAL_ERROR"));
        assert!(!body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("panicked"));
    }

    #[tokio::test]
    async fn test_chat_unreachable_assistant_yields_fallback() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(0)))).await;

        let response = send(
            &mut router,
            post_json(
                "/chat",
                &json!({ "message": "What is a normal cholesterol level?" }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "reply": FALLBACK_REPLY }));
    }

    #[tokio::test]
    async fn test_chat_blank_message_is_rejected() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(0)))).await;

        for body in [json!({ "message": "   " }), json!({})] {
            let response = send(&mut router, post_json("/chat", &body)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(response).await["error"]["code"], json!("INVALID_BODY"));
        }
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(0)))).await;

        let response = send(&mut router, get("/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "result": "welcome" }));

        let response = send(&mut router, get("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_metrics_are_exposed() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(0)))).await;
        let response = send(
            &mut router,
            post_json("/chat", &json!({ "message": "hello" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = send(&mut router, post_json("/predict", &scenario_a())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&mut router, get("/metrics")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let text = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(text.contains("heartrisk_chat_num_requests"));
        assert!(text.contains("outcome=\"fallback\""));
        assert!(text.contains("heartrisk_predict_num_requests"));
        assert!(text.contains("heartrisk_predict_latency"));
    }

    #[tokio::test]
    async fn test_openapi_document_is_served() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(0)))).await;

        let response = send(&mut router, get("/api-docs/openapi.json")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let document = body_json(response).await;
        assert!(document["paths"].get("/predict").is_some());
        assert!(document["paths"].get("/chat").is_some());
        assert!(document["paths"].get("/health").is_some());
    }

    #[tokio::test]
    async fn test_cors_preflight_from_allowed_origin() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(0)))).await;
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/predict")
            .header(header::ORIGIN, ALLOWED_ORIGIN)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();

        let response = send(&mut router, request).await;
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            ALLOWED_ORIGIN
        );
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
            "true"
        );
    }

    #[tokio::test]
    async fn test_cors_unknown_origin_is_not_allowed() {
        let mut router = setup_router(LoadedModel::LabelOnly(Arc::new(FixedLabel(0)))).await;
        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://evil.example")
            .body(Body::empty())
            .unwrap();

        let response = send(&mut router, request).await;
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[test]
    fn test_invalid_origin_is_rejected() {
        let error = cors_layer(&["http://bad\norigin".to_string()]).unwrap_err();
        assert!(matches!(error, StartupError::InvalidOrigin(_)));
    }

    #[test]
    fn test_missing_artifact_fails_startup() {
        let dir = tempdir().unwrap();
        let config = service_config(dir.path().join("missing.json"));
        let error = build_app_state(&config, Some("key".to_string())).err().unwrap();
        assert!(matches!(error, StartupError::ModelArtifact(_)));
    }

    #[test]
    fn test_missing_api_key_fails_startup() {
        let dir = tempdir().unwrap();
        let path = write_artifact(dir.path(), &model_artifact("linear_svc"));
        let config = service_config(path);

        for api_key in [None, Some(String::new())] {
            let error = build_app_state(&config, api_key).err().unwrap();
            assert!(matches!(error, StartupError::MissingCredential(_)));
        }
    }

    #[test]
    fn test_label_only_artifact_is_accepted() {
        let dir = tempdir().unwrap();
        let path = write_artifact(dir.path(), &model_artifact("linear_svc"));
        let app_state = build_app_state(&service_config(path), Some("key".to_string())).unwrap();
        assert_eq!(
            app_state.invoker.capability(),
            heartrisk_inference::ModelCapability::LabelOnly
        );
    }
}
