use rust_decimal_macros::dec;
use secrecy::Secret;
use serde_json::json;
use settlement_service::config::GatewayConfig;
use settlement_service::models::MobileOperator;
use settlement_service::services::gateway::{
    CollectionGateway, CollectionRequest, FeeBearer, GatewayError, MobileMoneyClient,
};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, timeout: Duration) -> MobileMoneyClient {
    MobileMoneyClient::new(GatewayConfig {
        base_url: server.uri(),
        api_key: Secret::new("sk_test".to_string()),
        webhook_secret: None,
        timeout,
        country: "CM".to_string(),
        fee_bearer: FeeBearer::Customer,
    })
    .unwrap()
}

fn request() -> CollectionRequest {
    CollectionRequest {
        amount: dec!(1025),
        phone: "237670000000".to_string(),
        reference: "TXN-1700000000000-0A1B2C3D".to_string(),
        operator: MobileOperator::Mtn,
    }
}

#[tokio::test]
async fn accepted_collection_returns_ack() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/collections/mobile-money"))
        .and(header("authorization", "Bearer sk_test"))
        .and(body_partial_json(json!({
            "reference": "TXN-1700000000000-0A1B2C3D",
            "phone": "237670000000",
            "country": "CM"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "flw_ref": "FLW-MOCK-77", "status": "pending_authorization" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ack = client(&server, Duration::from_secs(5))
        .initiate_collection(&request())
        .await
        .unwrap();

    assert_eq!(ack.provider_reference.as_deref(), Some("FLW-MOCK-77"));
    assert!(ack.is_processing());
}

#[tokio::test]
async fn rejection_carries_provider_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "message": "Invalid phone number" })),
        )
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5))
        .initiate_collection(&request())
        .await
        .unwrap_err();

    assert_eq!(err, GatewayError::Rejected("Invalid phone number".to_string()));
}

#[tokio::test]
async fn slow_gateway_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": "processing" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_millis(100))
        .initiate_collection(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Timeout(_)), "{err:?}");
}

#[tokio::test]
async fn unparseable_success_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5))
        .initiate_collection(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::InvalidResponse(_)));
}
