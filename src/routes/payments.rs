use axum::{
    Json, Router,
    extract::{Query, State},
    response::Redirect,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::payments::{PaymentCallbackParams, PaymentVerified, VerifyPaymentRequest},
    error::{AppError, AppResult},
    response::{ApiResponse, Meta},
    services::confirmation_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/verify", post(verify_payment))
        .route("/callback", get(payment_callback))
}

/// Server-to-server entry point. The HMAC signature is the authentication;
/// there is no bearer token on this route.
#[utoipa::path(
    post,
    path = "/api/payments/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment confirmed (or already confirmed)", body = ApiResponse<PaymentVerified>),
        (status = 401, description = "Invalid signature"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order not awaiting payment"),
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> AppResult<Json<ApiResponse<PaymentVerified>>> {
    let outcome = confirmation_service::verify_and_promote_order(&state, payload).await?;

    let message = if outcome.replay {
        "Payment already confirmed"
    } else {
        "Payment confirmed"
    };
    Ok(Json(ApiResponse::success(
        message,
        PaymentVerified {
            order_id: outcome.order_id,
            already_confirmed: outcome.replay,
        },
        Some(Meta::empty()),
    )))
}

/// Browser redirect from the payment provider. Never errors outward: every
/// failure is recorded on the order and turned into a redirect to the
/// failure page.
#[utoipa::path(
    get,
    path = "/api/payments/callback",
    params(
        ("order_id" = Option<String>, Query, description = "Order ID"),
        ("session_id" = Option<String>, Query, description = "Provider session ID"),
        ("transaction_id" = Option<String>, Query, description = "Provider transaction ID"),
        ("signature" = Option<String>, Query, description = "Provider HMAC signature"),
        ("status" = Option<String>, Query, description = "Provider-declared payment status"),
    ),
    responses(
        (status = 303, description = "Redirect to the success or failure page"),
    ),
    tag = "Payments"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    Query(params): Query<PaymentCallbackParams>,
) -> Redirect {
    let failure = state.config.payment_failure_url.as_str();
    let success = state.config.payment_success_url.as_str();

    let Some(order_id) = params
        .order_id
        .as_deref()
        .and_then(|raw| raw.parse::<Uuid>().ok())
    else {
        tracing::warn!(raw = ?params.order_id, "payment callback without a usable order_id");
        return Redirect::to(&with_param(failure, "reason", "missing_order_id"));
    };

    // The provider redirects here on declined and abandoned payments too.
    if let Some(status) = params.status.as_deref() {
        if !status.eq_ignore_ascii_case("success") {
            note_drop(&state, order_id, &format!("provider reported {status}")).await;
            return Redirect::to(&with_param(failure, "reason", "provider_declined"));
        }
    }

    let (Some(session_id), Some(transaction_id), Some(signature)) =
        (params.session_id, params.transaction_id, params.signature)
    else {
        note_drop(&state, order_id, "callback missing payment parameters").await;
        return Redirect::to(&with_param(failure, "reason", "missing_parameters"));
    };

    let input = VerifyPaymentRequest {
        order_id,
        session_id,
        transaction_id,
        signature,
        customer_name: params.name,
        customer_email: params.email,
        customer_mobile: params.mobile,
    };

    match confirmation_service::verify_and_promote_order(&state, input).await {
        Ok(outcome) => Redirect::to(&with_param(
            success,
            "order_id",
            &outcome.order_id.to_string(),
        )),
        Err(err) => {
            tracing::warn!(order_id = %order_id, error = %err, "payment callback failed");
            // The code goes into the redirect URL, the readable text onto
            // the order row.
            let (code, reason) = match &err {
                AppError::Unauthorized(_) => {
                    ("invalid_signature", "invalid payment signature".to_string())
                }
                AppError::Conflict(msg) => ("not_awaiting_payment", msg.clone()),
                AppError::NotFound => ("order_not_found", "order not found".to_string()),
                _ => ("verification_failed", "payment verification failed".to_string()),
            };
            // No row to annotate when the order does not exist.
            if !matches!(err, AppError::NotFound) {
                note_drop(&state, order_id, &reason).await;
            }
            Redirect::to(&with_param(failure, "reason", code))
        }
    }
}

/// Append a query parameter to a URL that may already carry a query string.
/// Values are restricted to URL-safe tokens (UUIDs and reason codes).
fn with_param(base: &str, key: &str, value: &str) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}{key}={value}")
}

async fn note_drop(state: &AppState, order_id: Uuid, reason: &str) {
    if let Err(err) =
        confirmation_service::record_drop_reason(&state.pool, order_id, reason).await
    {
        tracing::warn!(order_id = %order_id, error = %err, "failed to record drop reason");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_param_joins_existing_query_strings() {
        assert_eq!(
            with_param("/checkout/failed", "reason", "invalid_signature"),
            "/checkout/failed?reason=invalid_signature"
        );
        assert_eq!(
            with_param("https://shop.example/done?lang=en", "order_id", "abc"),
            "https://shop.example/done?lang=en&order_id=abc"
        );
    }
}
