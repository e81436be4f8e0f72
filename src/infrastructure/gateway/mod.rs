pub mod client;
pub mod types;

pub use client::{CryptoPayClient, PaymentGateway};
pub use types::{CreatedInvoice, GatewayError, GatewayInvoiceStatus, PayoutCheck};
