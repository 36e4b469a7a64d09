use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Verify the HMAC-SHA256 signature of a ticket webhook.
///
/// The signature arrives in the `X-Hub-Signature-256` header as hex, with or
/// without a `sha256=` prefix. An empty secret rejects every request.
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> Result<()> {
    if secret.is_empty() {
        return Err(AppError::WebhookVerification(
            "No webhook secret configured".to_string(),
        ));
    }

    let signature_hex = signature_header.trim();
    let signature_hex = signature_hex
        .strip_prefix("sha256=")
        .unwrap_or(signature_hex);
    if signature_hex.is_empty() {
        return Err(AppError::WebhookVerification("Missing signature".to_string()));
    }

    let signature_bytes = hex::decode(signature_hex)
        .map_err(|e| AppError::WebhookVerification(format!("Invalid hex in signature: {e}")))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::WebhookVerification(format!("Invalid HMAC key: {e}")))?;

    mac.update(payload);

    mac.verify_slice(&signature_bytes)
        .map_err(|_| AppError::WebhookVerification("Signature mismatch".to_string()))
}

/// Hex HMAC-SHA256 of `payload`, as a sender would put in the header.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::WebhookVerification(format!("Invalid HMAC key: {e}")))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
