use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("gateway refused the request: {0}")]
    Api(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Malformed(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub error: Option<ApiErrorBody>,
}

#[derive(Deserialize, Debug)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
}

impl<T> ApiResponse<T> {
    pub fn into_result(self) -> Result<T, GatewayError> {
        if !self.ok {
            let name = self
                .error
                .map(|err| {
                    err.name
                        .unwrap_or_else(|| format!("code {}", err.code.unwrap_or_default()))
                })
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(GatewayError::Api(name));
        }
        self.result
            .ok_or_else(|| GatewayError::Malformed("missing result".to_string()))
    }
}

#[derive(Serialize, Debug)]
pub struct CreateInvoiceRequest<'a> {
    pub asset: &'a str,
    pub amount: &'a str,
    pub description: String,
    pub payload: String,
    pub allow_anonymous: bool,
}

#[derive(Serialize, Debug)]
pub struct CreateCheckRequest<'a> {
    pub asset: &'a str,
    pub amount: &'a str,
    pub pin_to_user_id: i64,
}

#[derive(Deserialize, Debug)]
pub struct InvoiceBody {
    pub invoice_id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub pay_url: Option<String>,
    #[serde(default)]
    pub bot_invoice_url: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct InvoiceList {
    pub items: Vec<InvoiceBody>,
}

#[derive(Deserialize, Debug)]
pub struct CheckBody {
    pub check_id: i64,
    #[serde(default)]
    pub bot_check_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedInvoice {
    pub invoice_id: i64,
    pub pay_url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayInvoiceStatus {
    Active,
    Paid,
    Expired,
    Cancelled,
}

impl GatewayInvoiceStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "paid" => Some(Self::Paid),
            "expired" => Some(Self::Expired),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayoutCheck {
    pub check_id: i64,
    pub check_url: String,
}
