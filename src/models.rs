use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Order lifecycle states. Orders are created awaiting payment; only the
/// gateway confirmation path may move them to `PAYMENT_CONFIRMED`.
pub mod order_status {
    pub const PENDING_PAYMENT: &str = "pending_payment";
    pub const PAYMENT_CONFIRMED: &str = "payment_confirmed";
    pub const SHIPPED: &str = "shipped";
    pub const COMPLETED: &str = "completed";
    pub const CANCELLED: &str = "cancelled";

    pub fn is_valid(status: &str) -> bool {
        matches!(
            status,
            PENDING_PAYMENT | PAYMENT_CONFIRMED | SHIPPED | COMPLETED | CANCELLED
        )
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub price: i64,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct ProductSize {
    pub id: Uuid,
    pub product_id: Uuid,
    pub label: String,
    pub stock: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct CartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub size: Option<String>,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_mobile: Option<String>,
    pub shipping_address: String,
    pub total_amount: i64,
    pub shipping_cost: i64,
    pub status: String,
    pub payment_session_id: Option<String>,
    pub payment_transaction_id: Option<String>,
    pub drop_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub size: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub product_name: String,
    pub product_image: Option<String>,
    pub created_at: DateTime<Utc>,
}
