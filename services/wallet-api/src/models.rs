use crate::errors::ApiError;
use ledger_core::Amount;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

/// Amount as sent by clients: `"100.50"` or `100.50`.
///
/// Numbers keep their literal digits (`arbitrary_precision`), so a JSON
/// number is never rounded through `f64` on its way to a `Decimal`.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct AmountRepr(serde_json::Value);

impl AmountRepr {
    pub fn to_amount(&self) -> Result<Amount, ApiError> {
        let text = match &self.0 {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(ledger_core::Error::InvalidAmount(format!(
                    "expected a string or number, got {}",
                    other
                ))
                .into())
            }
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(|_| ledger_core::Error::InvalidAmount(format!("not a decimal: {:?}", text)).into())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: AmountRepr,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub to_wallet_id: Uuid,
    pub amount: AmountRepr,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
    pub last_checked: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: std::collections::BTreeMap<String, HealthCheck>,
}

/// Decode a JSON request body; any failure is the caller's fault
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::InvalidInput(format!("Invalid request body: {}", e)))
}

/// Decode a path segment as a UUID
pub fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::InvalidInput(format!("Invalid {} ID", what)))
}
