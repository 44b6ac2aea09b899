//! HTTP payment gateway client.

use super::{GatewayCharge, PaymentGateway};
use anyhow::anyhow;
use async_trait::async_trait;
use engine_core::error::AppError;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Gateway connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub api_base_url: String,
    pub key_id: String,
    pub key_secret: String,
}

/// Client for the charge API of an external payment gateway.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    config: GatewayConfig,
}

#[derive(Debug, Serialize)]
struct ChargeBody {
    amount: Decimal,
    currency: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    code: String,
    description: String,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if the gateway is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.is_empty()
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn charge(
        &self,
        invoice_number: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<GatewayCharge, AppError> {
        if !self.is_configured() {
            return Err(AppError::Gateway(anyhow!(
                "Gateway credentials not configured"
            )));
        }

        let body = ChargeBody {
            amount,
            currency: currency.to_string(),
            reference: invoice_number.to_string(),
        };

        let url = format!("{}/charges", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Gateway(anyhow!("Gateway request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::Gateway(anyhow!("Gateway response unreadable: {}", e)))?;

        tracing::debug!(status = %status, body = %text, "Gateway charge response");

        if status.is_success() {
            let charge: ChargeResponse = serde_json::from_str(&text)
                .map_err(|e| AppError::Gateway(anyhow!("Malformed gateway response: {}", e)))?;
            if charge.status != "captured" {
                return Err(AppError::Gateway(anyhow!(
                    "Charge {} not captured: {}",
                    charge.id,
                    charge.status
                )));
            }
            tracing::info!(
                transaction_id = %charge.id,
                invoice_number = %invoice_number,
                amount = %amount,
                "Gateway charge captured"
            );
            Ok(GatewayCharge {
                transaction_id: charge.id,
            })
        } else {
            let error: GatewayErrorBody =
                serde_json::from_str(&text).unwrap_or_else(|_| GatewayErrorBody {
                    code: "UNKNOWN".to_string(),
                    description: text.clone(),
                });
            tracing::error!(
                code = %error.code,
                description = %error.description,
                invoice_number = %invoice_number,
                "Gateway charge declined"
            );
            Err(AppError::Gateway(anyhow!(
                "Gateway error: {} - {}",
                error.code,
                error.description
            )))
        }
    }
}
