#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use hmac::{Hmac, Mac};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use sha2::Sha256;
use uuid::Uuid;

use boutique_api::{
    config::{AppConfig, Secret},
    db::{create_orm_conn, create_pool},
    dto::payments::VerifyPaymentRequest,
    entity::{order_items, orders, product_sizes, products, users},
    mailer::{MailerError, NotificationSender},
    models::order_status,
    payments::PaymentGateway,
    routes::create_api_router,
    state::AppState,
};

pub const GATEWAY_SECRET: &str = "test-gateway-secret";

pub fn database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
}

/// Captures sends so tests can count notifications.
#[derive(Default)]
pub struct RecordingMailer {
    sends: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<(), MailerError> {
        self.sends.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
        });
        Ok(())
    }
}

pub struct FailingMailer;

#[async_trait]
impl NotificationSender for FailingMailer {
    async fn send(&self, _to: &str, _subject: &str, _html_body: &str) -> Result<(), MailerError> {
        Err(MailerError::Request("connection refused".into()))
    }
}

pub fn test_config(database_url: &str) -> AppConfig {
    AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        payment_gateway_secret: Secret::new(GATEWAY_SECRET),
        payment_success_url: "/checkout/success".into(),
        payment_failure_url: "/checkout/failed".into(),
        shipping_flat_rate: 0,
        mail_api_url: None,
        mail_api_key: None,
        mail_from: None,
    }
}

/// Tests run in parallel against one database, so there is no truncation
/// here; every test works on rows it created itself (see `unique`).
pub async fn setup_state(database_url: &str) -> Result<(AppState, Arc<RecordingMailer>)> {
    let pool = create_pool(database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let orm = create_orm_conn(&pool);
    let mailer = Arc::new(RecordingMailer::default());
    let gateway = PaymentGateway::new(Secret::new(GATEWAY_SECRET))?;

    let state = AppState {
        pool,
        orm,
        config: Arc::new(test_config(database_url)),
        gateway,
        mailer: mailer.clone(),
    };
    Ok((state, mailer))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", create_api_router())
        .with_state(state)
}

pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Signature computed independently of the gateway, the way the provider
/// would compute it.
pub fn provider_signature(session_id: &str, transaction_id: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(GATEWAY_SECRET.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(format!("{session_id}|{transaction_id}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_request(
    order_id: Uuid,
    session_id: &str,
    transaction_id: &str,
) -> VerifyPaymentRequest {
    VerifyPaymentRequest {
        order_id,
        session_id: session_id.to_string(),
        transaction_id: transaction_id.to_string(),
        signature: provider_signature(session_id, transaction_id),
        customer_name: None,
        customer_email: None,
        customer_mobile: None,
    }
}

pub async fn create_user(state: &AppState, role: &str) -> Result<Uuid> {
    let user = users::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(format!("{}@example.com", unique("user"))),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}

pub async fn create_product(state: &AppState, price: i64, stock: i32) -> Result<products::Model> {
    let product = products::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(unique("product")),
        description: Set(Some("A product for testing".into())),
        image_url: Set(None),
        price: Set(price),
        stock: Set(stock),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(product)
}

pub async fn create_size(
    state: &AppState,
    product_id: Uuid,
    label: &str,
    stock: i32,
) -> Result<()> {
    product_sizes::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        label: Set(label.into()),
        stock: Set(stock),
    }
    .insert(&state.orm)
    .await?;

    Ok(())
}

pub async fn create_order(
    state: &AppState,
    user_id: Uuid,
    status: &str,
    customer_email: Option<&str>,
) -> Result<Uuid> {
    let order = orders::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        customer_name: Set("Test Customer".into()),
        customer_email: Set(customer_email.map(Into::into)),
        customer_mobile: Set(None),
        shipping_address: Set("1 Test Street".into()),
        total_amount: Set(0),
        shipping_cost: Set(0),
        status: Set(status.into()),
        payment_session_id: Set(None),
        payment_transaction_id: Set(None),
        drop_reason: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(order.id)
}

pub async fn create_pending_order(
    state: &AppState,
    user_id: Uuid,
    customer_email: Option<&str>,
) -> Result<Uuid> {
    create_order(state, user_id, order_status::PENDING_PAYMENT, customer_email).await
}

pub async fn add_line(
    state: &AppState,
    order_id: Uuid,
    product: &products::Model,
    size: Option<&str>,
    quantity: i32,
) -> Result<()> {
    order_items::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        product_id: Set(product.id),
        size: Set(size.map(Into::into)),
        quantity: Set(quantity),
        unit_price: Set(product.price),
        product_name: Set(product.name.clone()),
        product_image: Set(None),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(())
}

pub async fn order_row(state: &AppState, id: Uuid) -> Result<orders::Model> {
    let order = orders::Entity::find_by_id(id)
        .one(&state.orm)
        .await?
        .expect("order should exist");
    Ok(order)
}

pub async fn product_stock(state: &AppState, id: Uuid) -> Result<i32> {
    let product = products::Entity::find_by_id(id)
        .one(&state.orm)
        .await?
        .expect("product should exist");
    Ok(product.stock)
}

pub async fn size_stock(state: &AppState, product_id: Uuid, label: &str) -> Result<i32> {
    let (stock,): (i32,) = sqlx::query_as(
        "SELECT stock FROM product_sizes WHERE product_id = $1 AND label = $2",
    )
    .bind(product_id)
    .bind(label)
    .fetch_one(&state.pool)
    .await?;
    Ok(stock)
}
