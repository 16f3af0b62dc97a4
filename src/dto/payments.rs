use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    pub order_id: Uuid,
    pub session_id: String,
    pub transaction_id: String,
    pub signature: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_mobile: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentVerified {
    pub order_id: Uuid,
    /// True when the order was already confirmed and this call changed
    /// nothing.
    pub already_confirmed: bool,
}

/// Query parameters of the provider redirect. Everything is optional and
/// stringly typed here: a malformed redirect must land in the drop-reason
/// path, not in an extractor rejection.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentCallbackParams {
    pub order_id: Option<String>,
    pub session_id: Option<String>,
    pub transaction_id: Option<String>,
    pub signature: Option<String>,
    pub status: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub mobile: Option<String>,
}
