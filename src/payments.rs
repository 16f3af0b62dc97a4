use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::config::Secret;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway secret must not be empty")]
    EmptySecret,
}

/// Signature scheme shared with the payment provider.
///
/// The provider signs `sessionId|transactionId` with HMAC-SHA256 over the
/// shared secret and sends the lowercase hex digest alongside the redirect
/// or verification call. Both identifiers are opaque provider strings; the
/// `|` separator keeps `("ab", "c")` and `("a", "bc")` from colliding.
#[derive(Clone)]
pub struct PaymentGateway {
    secret: Secret,
}

impl PaymentGateway {
    /// The secret is validated here so a misconfigured deployment fails at
    /// boot instead of rejecting every live payment.
    pub fn new(secret: Secret) -> Result<Self, GatewayError> {
        if secret.is_empty() {
            return Err(GatewayError::EmptySecret);
        }
        Ok(Self { secret })
    }

    pub fn signature_for(&self, session_id: &str, transaction_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.reveal().as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(session_id.as_bytes());
        mac.update(b"|");
        mac.update(transaction_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn verify_signature(
        &self,
        session_id: &str,
        transaction_id: &str,
        provided: &str,
    ) -> bool {
        self.signature_for(session_id, transaction_id) == provided
    }
}
