use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::DbPool,
    dto::payments::VerifyPaymentRequest,
    error::{AppError, AppResult},
    models::order_status,
    state::AppState,
};

/// Result of a confirmation attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromotionOutcome {
    pub order_id: Uuid,
    /// The order was already confirmed by an earlier call; nothing changed.
    pub replay: bool,
}

#[derive(sqlx::FromRow)]
struct LineRow {
    product_id: Uuid,
    size: Option<String>,
    quantity: i32,
}

/// Verify a provider signature and promote the order to
/// `payment_confirmed`, decrementing stock for every line item in the same
/// transaction. Safe to call any number of times for the same order: only
/// the first successful call mutates anything.
///
/// Both payment entry points (the JSON verification call and the provider
/// redirect) funnel into this one routine.
pub async fn verify_and_promote_order(
    state: &AppState,
    input: VerifyPaymentRequest,
) -> AppResult<PromotionOutcome> {
    // Reject before touching the database. A bad signature must leave no
    // trace beyond the log line.
    if !state
        .gateway
        .verify_signature(&input.session_id, &input.transaction_id, &input.signature)
    {
        tracing::warn!(order_id = %input.order_id, "payment signature mismatch");
        return Err(AppError::Unauthorized("Invalid payment signature".into()));
    }

    let mut tx = state.pool.begin().await?;

    // The conditional update is the only mutual-exclusion point: exactly one
    // concurrent caller sees a row affected, everyone else lands in the
    // zero-rows branch below.
    let promoted = sqlx::query(
        r#"
        UPDATE orders
        SET status = $2,
            payment_session_id = $3,
            payment_transaction_id = $4,
            customer_mobile = COALESCE(customer_mobile, $5),
            updated_at = now()
        WHERE id = $1 AND status = $6
        "#,
    )
    .bind(input.order_id)
    .bind(order_status::PAYMENT_CONFIRMED)
    .bind(&input.session_id)
    .bind(&input.transaction_id)
    .bind(input.customer_mobile.as_deref())
    .bind(order_status::PENDING_PAYMENT)
    .execute(&mut *tx)
    .await?;

    if promoted.rows_affected() == 0 {
        let current: Option<(String,)> = sqlx::query_as("SELECT status FROM orders WHERE id = $1")
            .bind(input.order_id)
            .fetch_optional(&mut *tx)
            .await?;
        tx.rollback().await?;

        return match current {
            Some((status,)) if status == order_status::PAYMENT_CONFIRMED => {
                tracing::info!(order_id = %input.order_id, "payment already confirmed, replay");
                Ok(PromotionOutcome {
                    order_id: input.order_id,
                    replay: true,
                })
            }
            // A cancellation (or any other state) that raced us is a dead
            // end, not a replay.
            Some((status,)) => Err(AppError::Conflict(format!(
                "order is {status}, not awaiting payment"
            ))),
            None => Err(AppError::NotFound),
        };
    }

    let lines = sqlx::query_as::<_, LineRow>(
        "SELECT product_id, size, quantity FROM order_items WHERE order_id = $1",
    )
    .bind(input.order_id)
    .fetch_all(&mut *tx)
    .await?;

    for line in &lines {
        if let Some(size) = line.size.as_deref() {
            // The clamp runs inside the UPDATE so concurrent decrements on
            // the same row serialize without lost updates.
            let updated = sqlx::query(
                r#"
                UPDATE product_sizes
                SET stock = GREATEST(0, stock - $1)
                WHERE product_id = $2 AND label = $3
                "#,
            )
            .bind(line.quantity)
            .bind(line.product_id)
            .bind(size)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                // Dropping the transaction rolls everything back, including
                // the status change above.
                return Err(AppError::Internal(anyhow::anyhow!(
                    "size {size} no longer exists for product {}",
                    line.product_id
                )));
            }
        }

        sqlx::query("UPDATE products SET stock = GREATEST(0, stock - $1) WHERE id = $2")
            .bind(line.quantity)
            .bind(line.product_id)
            .execute(&mut *tx)
            .await?;
    }

    let (stored_name, stored_email): (String, Option<String>) =
        sqlx::query_as("SELECT customer_name, customer_email FROM orders WHERE id = $1")
            .bind(input.order_id)
            .fetch_one(&mut *tx)
            .await?;

    tx.commit().await?;

    tracing::info!(
        order_id = %input.order_id,
        transaction_id = %input.transaction_id,
        "payment confirmed"
    );

    if let Err(err) = log_audit(
        &state.pool,
        None,
        "payment_confirmed",
        Some("orders"),
        Some(json!({
            "order_id": input.order_id,
            "transaction_id": input.transaction_id,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    // Post-commit and fire-and-forget: a mail failure is logged, never
    // bubbled into the payment outcome.
    let recipient = input.customer_email.or(stored_email);
    if let Some(email) = recipient {
        let name = input.customer_name.unwrap_or(stored_name);
        let mailer = state.mailer.clone();
        let order_id = input.order_id;
        tokio::spawn(async move {
            let subject = format!("Your order {} is confirmed", short_reference(order_id));
            let body = confirmation_email_body(&name, order_id);
            if let Err(err) = mailer.send(&email, &subject, &body).await {
                tracing::warn!(order_id = %order_id, error = %err, "confirmation email failed");
            }
        });
    }

    Ok(PromotionOutcome {
        order_id: input.order_id,
        replay: false,
    })
}

/// Durably note why a provider callback failed, but only while the order is
/// still awaiting payment. A confirmed or cancelled order keeps its state.
pub async fn record_drop_reason(pool: &DbPool, order_id: Uuid, reason: &str) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE orders
        SET drop_reason = $2, updated_at = now()
        WHERE id = $1 AND status = $3
        "#,
    )
    .bind(order_id)
    .bind(reason)
    .bind(order_status::PENDING_PAYMENT)
    .execute(pool)
    .await?;

    Ok(())
}

fn short_reference(order_id: Uuid) -> String {
    order_id.to_string()[..8].to_uppercase()
}

fn confirmation_email_body(customer_name: &str, order_id: Uuid) -> String {
    format!(
        "<p>Hi {customer_name},</p>\
         <p>We have received your payment and your order <strong>{}</strong> \
         is confirmed. We'll let you know as soon as it ships.</p>\
         <p>Thank you for shopping with us!</p>",
        short_reference(order_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_body_addresses_the_customer_and_order() {
        let order_id = Uuid::new_v4();
        let body = confirmation_email_body("Ada", order_id);
        assert!(body.contains("Hi Ada"));
        assert!(body.contains(&short_reference(order_id)));
    }

    #[test]
    fn short_reference_is_stable_prefix() {
        let order_id: Uuid = "01890a5d-ac96-774b-bcce-b302099a8057".parse().unwrap();
        assert_eq!(short_reference(order_id), "01890A5D");
    }
}
