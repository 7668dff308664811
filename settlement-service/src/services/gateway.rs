//! Mobile-money collection gateway adapter.
//!
//! A pure outbound call: build a provider-agnostic collection request, send
//! it, and hand back the provider's acknowledgement. Retries are the
//! caller's decision; the ledger treats a failed initiation as final.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::config::GatewayConfig;
use crate::models::MobileOperator;
use service_core::utils::signature::verify_payload_signature;

/// Header carrying the hex HMAC-SHA256 of the raw webhook body.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeBearer {
    Customer,
    Merchant,
}

impl FromStr for FeeBearer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(FeeBearer::Customer),
            "merchant" => Ok(FeeBearer::Merchant),
            other => Err(format!("unknown fee bearer: {other}")),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    /// The provider refused the collection; carries its message.
    #[error("{0}")]
    Rejected(String),

    #[error("payment gateway did not answer within {0:?}")]
    Timeout(Duration),

    #[error("payment gateway unreachable: {0}")]
    Transport(String),

    #[error("unexpected payment gateway response: {0}")]
    InvalidResponse(String),
}

/// What the ledger asks the gateway to collect.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRequest {
    pub amount: Decimal,
    pub phone: String,
    pub reference: String,
    pub operator: MobileOperator,
}

#[derive(Debug, Serialize)]
struct CollectionBody<'a> {
    amount: Decimal,
    phone: &'a str,
    reference: &'a str,
    operator: &'a str,
    country: &'a str,
    fee_bearer: FeeBearer,
}

/// Provider acknowledgement of an accepted collection request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GatewayAck {
    #[serde(alias = "flw_ref")]
    pub provider_reference: Option<String>,
    pub status: Option<String>,
}

impl GatewayAck {
    /// The payer has been prompted and authorization is in flight.
    pub fn is_processing(&self) -> bool {
        matches!(
            self.status.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("processing" | "pending_authorization")
        )
    }
}

#[derive(Debug, Deserialize)]
struct AckEnvelope {
    data: Option<GatewayAck>,
    #[serde(flatten)]
    top: GatewayAck,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

#[async_trait]
pub trait CollectionGateway: Send + Sync {
    async fn initiate_collection(
        &self,
        request: &CollectionRequest,
    ) -> Result<GatewayAck, GatewayError>;
}

/// HTTP client for the mobile-money provider.
#[derive(Clone)]
pub struct MobileMoneyClient {
    client: Client,
    config: GatewayConfig,
}

impl MobileMoneyClient {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn collection_url(&self) -> String {
        format!(
            "{}/collections/mobile-money",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl CollectionGateway for MobileMoneyClient {
    async fn initiate_collection(
        &self,
        request: &CollectionRequest,
    ) -> Result<GatewayAck, GatewayError> {
        let body = CollectionBody {
            amount: request.amount,
            phone: &request.phone,
            reference: &request.reference,
            operator: request.operator.network_code(),
            country: &self.config.country,
            fee_bearer: self.config.fee_bearer,
        };

        let response = self
            .client
            .post(self.collection_url())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.config.timeout)
                } else {
                    GatewayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        tracing::debug!(status = %status, reference = %request.reference, "Gateway collection response");

        if status.is_success() {
            let envelope: AckEnvelope = serde_json::from_str(&text)
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
            let ack = envelope.data.unwrap_or(envelope.top);
            tracing::info!(
                reference = %request.reference,
                provider_reference = ?ack.provider_reference,
                provider_status = ?ack.status,
                "Gateway accepted collection"
            );
            Ok(ack)
        } else {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|b| b.message.or(b.error))
                .unwrap_or_else(|| format!("gateway returned {status}"));
            tracing::warn!(
                reference = %request.reference,
                status = %status,
                message = %message,
                "Gateway rejected collection"
            );
            Err(GatewayError::Rejected(message))
        }
    }
}

/// Check the webhook signature header against the raw body.
pub fn verify_webhook_signature(
    secret: &Secret<String>,
    body: &[u8],
    signature: Option<&str>,
) -> bool {
    let Some(signature) = signature else {
        return false;
    };
    verify_payload_signature(secret.expose_secret(), body, signature).unwrap_or(false)
}

/// Scriptable gateway for tests and local runs.
pub struct MockGateway {
    requests: Mutex<Vec<CollectionRequest>>,
    response: Result<GatewayAck, GatewayError>,
    delay: Option<Duration>,
}

impl MockGateway {
    pub fn accepting() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            response: Ok(GatewayAck {
                provider_reference: Some("mock-provider-ref".to_string()),
                status: Some("processing".to_string()),
            }),
            delay: None,
        }
    }

    pub fn rejecting(message: &str) -> Self {
        Self {
            response: Err(GatewayError::Rejected(message.to_string())),
            ..Self::accepting()
        }
    }

    pub fn with_status(mut self, status: Option<&str>) -> Self {
        if let Ok(ack) = &mut self.response {
            ack.status = status.map(str::to_string);
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<CollectionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CollectionGateway for MockGateway {
    async fn initiate_collection(
        &self,
        request: &CollectionRequest,
    ) -> Result<GatewayAck, GatewayError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response.clone()
    }
}
