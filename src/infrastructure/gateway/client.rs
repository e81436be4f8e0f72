use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::types::*;

/// The three payment-provider calls the bot relies on.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(
        &self,
        user_id: i64,
        amount_usdt: &str,
    ) -> Result<CreatedInvoice, GatewayError>;

    async fn get_invoice_status(&self, invoice_id: i64)
    -> Result<GatewayInvoiceStatus, GatewayError>;

    async fn create_payout_check(
        &self,
        user_id: i64,
        amount_usdt: &str,
    ) -> Result<PayoutCheck, GatewayError>;
}

/// Crypto Pay (`@CryptoBot`) REST client.
pub struct CryptoPayClient {
    http: Client,
    base_url: String,
    token: String,
    asset: String,
}

impl CryptoPayClient {
    pub fn new(
        base_url: &str,
        token: String,
        asset: String,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            asset,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            log::warn!("gateway {} failed: status={} body={}", context, status, body);
            return Err(GatewayError::Status(status.as_u16()));
        }
        let parsed: ApiResponse<T> = serde_json::from_str(&body).map_err(|e| {
            GatewayError::Malformed(format!("{} response: {}, Body: {}", context, e, body))
        })?;
        parsed.into_result()
    }
}

#[async_trait]
impl PaymentGateway for CryptoPayClient {
    async fn create_invoice(
        &self,
        user_id: i64,
        amount_usdt: &str,
    ) -> Result<CreatedInvoice, GatewayError> {
        let request = CreateInvoiceRequest {
            asset: &self.asset,
            amount: amount_usdt,
            description: format!("Balance top-up for user {}", user_id),
            payload: user_id.to_string(),
            allow_anonymous: false,
        };
        let response = self
            .http
            .post(self.url("createInvoice"))
            .header("Crypto-Pay-API-Token", &self.token)
            .json(&request)
            .send()
            .await?;
        let invoice: InvoiceBody = Self::decode(response, "createInvoice").await?;
        let pay_url = invoice
            .bot_invoice_url
            .or(invoice.pay_url)
            .ok_or_else(|| GatewayError::Malformed("invoice without payment link".to_string()))?;
        Ok(CreatedInvoice {
            invoice_id: invoice.invoice_id,
            pay_url,
        })
    }

    async fn get_invoice_status(
        &self,
        invoice_id: i64,
    ) -> Result<GatewayInvoiceStatus, GatewayError> {
        let response = self
            .http
            .get(self.url("getInvoices"))
            .header("Crypto-Pay-API-Token", &self.token)
            .query(&[("invoice_ids", invoice_id.to_string())])
            .send()
            .await?;
        let list: InvoiceList = Self::decode(response, "getInvoices").await?;
        let item = list
            .items
            .into_iter()
            .find(|item| item.invoice_id == invoice_id)
            .ok_or_else(|| GatewayError::Malformed(format!("invoice {} not listed", invoice_id)))?;
        let raw = item.status.unwrap_or_default();
        GatewayInvoiceStatus::parse(&raw)
            .ok_or_else(|| GatewayError::Malformed(format!("unknown invoice status '{}'", raw)))
    }

    async fn create_payout_check(
        &self,
        user_id: i64,
        amount_usdt: &str,
    ) -> Result<PayoutCheck, GatewayError> {
        let request = CreateCheckRequest {
            asset: &self.asset,
            amount: amount_usdt,
            pin_to_user_id: user_id,
        };
        let response = self
            .http
            .post(self.url("createCheck"))
            .header("Crypto-Pay-API-Token", &self.token)
            .json(&request)
            .send()
            .await?;
        let check: CheckBody = Self::decode(response, "createCheck").await?;
        let check_url = check
            .bot_check_url
            .ok_or_else(|| GatewayError::Malformed("check without redemption link".to_string()))?;
        Ok(PayoutCheck {
            check_id: check.check_id,
            check_url,
        })
    }
}
