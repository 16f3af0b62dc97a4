mod support;

use std::sync::Arc;

use uuid::Uuid;

use boutique_api::dto::auth::{LoginRequest, RegisterRequest};
use boutique_api::dto::cart::AddToCartRequest;
use boutique_api::dto::orders::CheckoutRequest;
use boutique_api::dto::products::{CreateProductRequest, SizeInput, UpdateProductRequest};
use boutique_api::error::AppError;
use boutique_api::middleware::auth::AuthUser;
use boutique_api::models::order_status;
use boutique_api::routes::admin::{InventoryAdjustRequest, LowStockQuery, UpdateOrderStatusRequest};
use boutique_api::routes::params::{OrderListQuery, Pagination, ProductQuery};
use boutique_api::services::{
    admin_service, auth_service, cart_service, order_service, product_service,
};
use boutique_api::state::AppState;

fn as_user(user_id: Uuid) -> AuthUser {
    AuthUser {
        user_id,
        role: "user".into(),
    }
}

fn as_admin(user_id: Uuid) -> AuthUser {
    AuthUser {
        user_id,
        role: "admin".into(),
    }
}

fn checkout_payload() -> CheckoutRequest {
    CheckoutRequest {
        customer_name: "Grace Hopper".into(),
        customer_email: Some("grace@example.com".into()),
        customer_mobile: None,
        shipping_address: "1 Harbor Lane".into(),
    }
}

#[tokio::test]
async fn registration_and_login_guard_credentials() -> anyhow::Result<()> {
    let Some(database_url) = support::database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run it");
        return Ok(());
    };
    let (state, _mailer) = support::setup_state(&database_url).await?;

    let email = format!("{}@example.com", support::unique("shopper"));
    let created = auth_service::register_user(
        &state.pool,
        RegisterRequest {
            email: email.clone(),
            password: "correct horse".into(),
        },
    )
    .await?;
    assert_eq!(created.data.as_ref().map(|u| u.email.as_str()), Some(email.as_str()));

    let duplicate = auth_service::register_user(
        &state.pool,
        RegisterRequest {
            email: email.clone(),
            password: "another".into(),
        },
    )
    .await;
    assert!(matches!(duplicate, Err(AppError::BadRequest(_))));

    let wrong = auth_service::login_user(
        &state.pool,
        LoginRequest {
            email: email.clone(),
            password: "battery staple".into(),
        },
    )
    .await;
    assert!(matches!(wrong, Err(AppError::Unauthorized(_))));

    // Token issuance needs the signing secret from the environment.
    if std::env::var("JWT_SECRET").is_ok() {
        let login = auth_service::login_user(
            &state.pool,
            LoginRequest {
                email,
                password: "correct horse".into(),
            },
        )
        .await?;
        let token = login.data.expect("login should return a token").token;
        assert!(token.starts_with("Bearer "));
    }

    Ok(())
}

#[tokio::test]
async fn cart_keeps_one_row_per_product_and_size() -> anyhow::Result<()> {
    let Some(database_url) = support::database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run it");
        return Ok(());
    };
    let (state, _mailer) = support::setup_state(&database_url).await?;

    let user_id = support::create_user(&state, "user").await?;
    let user = as_user(user_id);
    let product = support::create_product(&state, 5200, 10).await?;
    support::create_size(&state, product.id, "M", 6).await?;
    support::create_size(&state, product.id, "L", 4).await?;

    let added = cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id: product.id,
            size: Some("M".into()),
            quantity: 1,
        },
    )
    .await?;
    let first_row_id = added.data.as_ref().map(|i| i.id).expect("cart item");

    // Re-adding the same size updates the row instead of duplicating it.
    let updated = cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id: product.id,
            size: Some("M".into()),
            quantity: 3,
        },
    )
    .await?;
    let updated = updated.data.expect("cart item");
    assert_eq!(updated.id, first_row_id);
    assert_eq!(updated.quantity, 3);

    // A different size is its own row.
    cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id: product.id,
            size: Some("L".into()),
            quantity: 2,
        },
    )
    .await?;

    let listing = cart_service::list_cart(
        &state.pool,
        &user,
        Pagination {
            page: None,
            per_page: None,
        },
    )
    .await?;
    let items = listing.data.expect("cart list").items;
    assert_eq!(items.len(), 2);

    // Remove one row, the other stays.
    cart_service::remove_from_cart(&state.pool, &user, first_row_id).await?;
    let listing = cart_service::list_cart(
        &state.pool,
        &user,
        Pagination {
            page: None,
            per_page: None,
        },
    )
    .await?;
    assert_eq!(listing.data.expect("cart list").items.len(), 1);

    let gone = cart_service::remove_from_cart(&state.pool, &user, first_row_id).await;
    assert!(matches!(gone, Err(AppError::NotFound)));

    Ok(())
}

#[tokio::test]
async fn cart_rejects_unknown_sizes_and_bad_quantities() -> anyhow::Result<()> {
    let Some(database_url) = support::database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run it");
        return Ok(());
    };
    let (state, _mailer) = support::setup_state(&database_url).await?;

    let user_id = support::create_user(&state, "user").await?;
    let user = as_user(user_id);
    let product = support::create_product(&state, 3100, 8).await?;
    support::create_size(&state, product.id, "S", 8).await?;

    let missing_size = cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id: product.id,
            size: Some("XXL".into()),
            quantity: 1,
        },
    )
    .await;
    assert!(matches!(missing_size, Err(AppError::BadRequest(_))));

    let zero_quantity = cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id: product.id,
            size: Some("S".into()),
            quantity: 0,
        },
    )
    .await;
    assert!(matches!(zero_quantity, Err(AppError::BadRequest(_))));

    let unknown_product = cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id: Uuid::new_v4(),
            size: None,
            quantity: 1,
        },
    )
    .await;
    assert!(matches!(unknown_product, Err(AppError::BadRequest(_))));

    Ok(())
}

#[tokio::test]
async fn checkout_snapshots_the_cart_into_a_pending_order() -> anyhow::Result<()> {
    let Some(database_url) = support::database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run it");
        return Ok(());
    };
    let (state, _mailer) = support::setup_state(&database_url).await?;
    let mut config = support::test_config(&database_url);
    config.shipping_flat_rate = 250;
    let state = AppState {
        config: Arc::new(config),
        ..state
    };

    let user_id = support::create_user(&state, "user").await?;
    let user = as_user(user_id);
    let dress = support::create_product(&state, 4500, 5).await?;
    let jacket = support::create_product(&state, 5200, 10).await?;
    support::create_size(&state, jacket.id, "M", 4).await?;

    cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id: dress.id,
            size: None,
            quantity: 2,
        },
    )
    .await?;
    cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id: jacket.id,
            size: Some("M".into()),
            quantity: 1,
        },
    )
    .await?;

    let response = order_service::checkout(&state, &user, checkout_payload()).await?;
    let placed = response.data.expect("checkout result");

    assert_eq!(placed.order.status, order_status::PENDING_PAYMENT);
    assert_eq!(placed.order.shipping_cost, 250);
    assert_eq!(placed.order.total_amount, 2 * 4500 + 5200 + 250);
    assert_eq!(placed.order.customer_name, "Grace Hopper");
    assert_eq!(placed.items.len(), 2);

    let jacket_line = placed
        .items
        .iter()
        .find(|i| i.product_id == jacket.id)
        .expect("jacket line");
    assert_eq!(jacket_line.size.as_deref(), Some("M"));
    assert_eq!(jacket_line.unit_price, 5200);
    assert_eq!(jacket_line.product_name, jacket.name);

    // Checkout reserves nothing; stock moves at payment confirmation.
    assert_eq!(support::product_stock(&state, dress.id).await?, 5);
    assert_eq!(support::product_stock(&state, jacket.id).await?, 10);
    assert_eq!(support::size_stock(&state, jacket.id, "M").await?, 4);

    // The cart is cleared in the same transaction.
    let listing = cart_service::list_cart(
        &state.pool,
        &user,
        Pagination {
            page: None,
            per_page: None,
        },
    )
    .await?;
    assert!(listing.data.expect("cart list").items.is_empty());

    // The order shows up for its owner.
    let orders = order_service::list_orders(
        &state,
        &user,
        OrderListQuery {
            pagination: Pagination {
                page: None,
                per_page: None,
            },
            status: Some(order_status::PENDING_PAYMENT.into()),
            sort_order: None,
        },
    )
    .await?;
    let orders = orders.data.expect("order list").items;
    assert!(orders.iter().any(|o| o.id == placed.order.id));

    // Another customer cannot fetch it.
    let stranger = as_user(support::create_user(&state, "user").await?);
    let denied = order_service::get_order(&state, &stranger, placed.order.id).await;
    assert!(matches!(denied, Err(AppError::NotFound)));

    Ok(())
}

#[tokio::test]
async fn checkout_validates_stock_and_contact_fields() -> anyhow::Result<()> {
    let Some(database_url) = support::database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run it");
        return Ok(());
    };
    let (state, _mailer) = support::setup_state(&database_url).await?;

    let user_id = support::create_user(&state, "user").await?;
    let user = as_user(user_id);

    let empty_cart = order_service::checkout(&state, &user, checkout_payload()).await;
    assert!(matches!(empty_cart, Err(AppError::BadRequest(_))));

    let product = support::create_product(&state, 4500, 5).await?;
    cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id: product.id,
            size: None,
            quantity: 6,
        },
    )
    .await?;

    let oversold = order_service::checkout(&state, &user, checkout_payload()).await;
    assert!(matches!(oversold, Err(AppError::BadRequest(_))));

    let mut blank_name = checkout_payload();
    blank_name.customer_name = "  ".into();
    let rejected = order_service::checkout(&state, &user, blank_name).await;
    assert!(matches!(rejected, Err(AppError::BadRequest(_))));

    // Nothing was created along the way.
    let (order_count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&state.pool)
            .await?;
    assert_eq!(order_count, 0);

    Ok(())
}

#[tokio::test]
async fn admin_status_updates_never_mint_confirmations() -> anyhow::Result<()> {
    let Some(database_url) = support::database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run it");
        return Ok(());
    };
    let (state, _mailer) = support::setup_state(&database_url).await?;

    let admin = as_admin(support::create_user(&state, "admin").await?);
    let shopper_id = support::create_user(&state, "user").await?;
    let order_id = support::create_pending_order(&state, shopper_id, None).await?;

    let minted = admin_service::update_order_status(
        &state,
        &admin,
        order_id,
        UpdateOrderStatusRequest {
            status: order_status::PAYMENT_CONFIRMED.into(),
        },
    )
    .await;
    assert!(matches!(minted, Err(AppError::BadRequest(_))));

    let unknown = admin_service::update_order_status(
        &state,
        &admin,
        order_id,
        UpdateOrderStatusRequest {
            status: "paid".into(),
        },
    )
    .await;
    assert!(matches!(unknown, Err(AppError::BadRequest(_))));

    let confirmed =
        support::create_order(&state, shopper_id, order_status::PAYMENT_CONFIRMED, None).await?;
    let shipped = admin_service::update_order_status(
        &state,
        &admin,
        confirmed,
        UpdateOrderStatusRequest {
            status: order_status::SHIPPED.into(),
        },
    )
    .await?;
    assert_eq!(
        shipped.data.map(|o| o.status),
        Some(order_status::SHIPPED.to_string())
    );

    let shopper = as_user(shopper_id);
    let forbidden = admin_service::update_order_status(
        &state,
        &shopper,
        order_id,
        UpdateOrderStatusRequest {
            status: order_status::CANCELLED.into(),
        },
    )
    .await;
    assert!(matches!(forbidden, Err(AppError::Forbidden)));

    Ok(())
}

#[tokio::test]
async fn low_stock_report_shows_which_variant_ran_out() -> anyhow::Result<()> {
    let Some(database_url) = support::database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run it");
        return Ok(());
    };
    let (state, _mailer) = support::setup_state(&database_url).await?;

    let admin = as_admin(support::create_user(&state, "admin").await?);
    let scarce = support::create_product(&state, 2800, 2).await?;
    support::create_size(&state, scarce.id, "S", 0).await?;
    support::create_size(&state, scarce.id, "M", 2).await?;
    let plentiful = support::create_product(&state, 900, 50).await?;

    let report = admin_service::list_low_stock(
        &state,
        &admin,
        LowStockQuery {
            pagination: Pagination {
                page: None,
                per_page: Some(100),
            },
            threshold: None,
        },
    )
    .await?;
    let items = report.data.expect("low stock list").items;

    let flagged = items
        .iter()
        .find(|d| d.product.id == scarce.id)
        .expect("scarce product should be flagged");
    assert_eq!(flagged.sizes.len(), 2);
    assert!(flagged.sizes.iter().any(|s| s.label == "S" && s.stock == 0));
    assert!(!items.iter().any(|d| d.product.id == plentiful.id));

    Ok(())
}

#[tokio::test]
async fn inventory_adjustments_follow_the_size_rules() -> anyhow::Result<()> {
    let Some(database_url) = support::database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run it");
        return Ok(());
    };
    let (state, _mailer) = support::setup_state(&database_url).await?;

    let admin = as_admin(support::create_user(&state, "admin").await?);
    let sized = support::create_product(&state, 6400, 6).await?;
    support::create_size(&state, sized.id, "M", 4).await?;
    support::create_size(&state, sized.id, "L", 2).await?;

    let restocked = admin_service::adjust_inventory(
        &state,
        &admin,
        sized.id,
        InventoryAdjustRequest {
            delta: 5,
            size: Some("M".into()),
        },
    )
    .await?;
    let detail = restocked.data.expect("product detail");
    assert_eq!(detail.product.stock, 11);
    assert!(detail.sizes.iter().any(|s| s.label == "M" && s.stock == 9));
    assert_eq!(support::size_stock(&state, sized.id, "M").await?, 9);

    let overdrawn = admin_service::adjust_inventory(
        &state,
        &admin,
        sized.id,
        InventoryAdjustRequest {
            delta: -20,
            size: Some("L".into()),
        },
    )
    .await;
    assert!(matches!(overdrawn, Err(AppError::BadRequest(_))));
    assert_eq!(support::size_stock(&state, sized.id, "L").await?, 2);

    let no_size = admin_service::adjust_inventory(
        &state,
        &admin,
        sized.id,
        InventoryAdjustRequest {
            delta: 1,
            size: None,
        },
    )
    .await;
    assert!(matches!(no_size, Err(AppError::BadRequest(_))));

    let wrong_size = admin_service::adjust_inventory(
        &state,
        &admin,
        sized.id,
        InventoryAdjustRequest {
            delta: 1,
            size: Some("XL".into()),
        },
    )
    .await;
    assert!(matches!(wrong_size, Err(AppError::BadRequest(_))));

    let flat = support::create_product(&state, 1200, 3).await?;
    let drained = admin_service::adjust_inventory(
        &state,
        &admin,
        flat.id,
        InventoryAdjustRequest {
            delta: -3,
            size: None,
        },
    )
    .await?;
    assert_eq!(drained.data.expect("product detail").product.stock, 0);

    let negative = admin_service::adjust_inventory(
        &state,
        &admin,
        flat.id,
        InventoryAdjustRequest {
            delta: -1,
            size: None,
        },
    )
    .await;
    assert!(matches!(negative, Err(AppError::BadRequest(_))));

    let noop = admin_service::adjust_inventory(
        &state,
        &admin,
        flat.id,
        InventoryAdjustRequest {
            delta: 0,
            size: None,
        },
    )
    .await;
    assert!(matches!(noop, Err(AppError::BadRequest(_))));

    let shopper = as_user(support::create_user(&state, "user").await?);
    let forbidden = admin_service::adjust_inventory(
        &state,
        &shopper,
        flat.id,
        InventoryAdjustRequest {
            delta: 1,
            size: None,
        },
    )
    .await;
    assert!(matches!(forbidden, Err(AppError::Forbidden)));

    Ok(())
}

#[tokio::test]
async fn product_aggregate_stock_is_derived_from_sizes() -> anyhow::Result<()> {
    let Some(database_url) = support::database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run it");
        return Ok(());
    };
    let (state, _mailer) = support::setup_state(&database_url).await?;

    let admin = as_admin(support::create_user(&state, "admin").await?);

    let created = product_service::create_product(
        &state,
        &admin,
        CreateProductRequest {
            name: support::unique("linen-dress"),
            description: "Breathable summer staple".into(),
            image_url: None,
            price: 4500,
            // Ignored because sizes are present.
            stock: Some(99),
            sizes: Some(vec![
                SizeInput {
                    label: "S".into(),
                    stock: 2,
                },
                SizeInput {
                    label: "M".into(),
                    stock: 3,
                },
            ]),
        },
    )
    .await?;
    let detail = created.data.expect("product detail");
    assert_eq!(detail.product.stock, 5);
    assert_eq!(detail.sizes.len(), 2);
    let product_id = detail.product.id;

    // Replacing the variant set recomputes the aggregate.
    let updated = product_service::update_product(
        &state,
        &admin,
        product_id,
        UpdateProductRequest {
            name: None,
            description: None,
            image_url: None,
            price: None,
            stock: None,
            sizes: Some(vec![SizeInput {
                label: "M".into(),
                stock: 1,
            }]),
        },
    )
    .await?;
    let detail = updated.data.expect("product detail");
    assert_eq!(detail.product.stock, 1);
    assert_eq!(detail.sizes.len(), 1);

    // Flat stock cannot be written onto a sized product.
    let hand_set = product_service::update_product(
        &state,
        &admin,
        product_id,
        UpdateProductRequest {
            name: None,
            description: None,
            image_url: None,
            price: None,
            stock: Some(9),
            sizes: None,
        },
    )
    .await;
    assert!(matches!(hand_set, Err(AppError::BadRequest(_))));

    let duplicate_labels = product_service::create_product(
        &state,
        &admin,
        CreateProductRequest {
            name: support::unique("scarf"),
            description: "Silk".into(),
            image_url: None,
            price: 2100,
            stock: None,
            sizes: Some(vec![
                SizeInput {
                    label: "M".into(),
                    stock: 1,
                },
                SizeInput {
                    label: "M".into(),
                    stock: 2,
                },
            ]),
        },
    )
    .await;
    assert!(matches!(duplicate_labels, Err(AppError::BadRequest(_))));

    product_service::delete_product(&state, &admin, product_id).await?;
    let gone = product_service::get_product(&state, product_id).await;
    assert!(matches!(gone, Err(AppError::NotFound)));
    let (size_rows,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM product_sizes WHERE product_id = $1")
            .bind(product_id)
            .fetch_one(&state.pool)
            .await?;
    assert_eq!(size_rows, 0);

    Ok(())
}

#[tokio::test]
async fn product_search_matches_name_and_respects_price_bounds() -> anyhow::Result<()> {
    let Some(database_url) = support::database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run it");
        return Ok(());
    };
    let (state, _mailer) = support::setup_state(&database_url).await?;

    let admin = as_admin(support::create_user(&state, "admin").await?);
    let marker = support::unique("tote");

    product_service::create_product(
        &state,
        &admin,
        CreateProductRequest {
            name: format!("{marker} classic"),
            description: "Everyday carry".into(),
            image_url: None,
            price: 3000,
            stock: Some(4),
            sizes: None,
        },
    )
    .await?;
    product_service::create_product(
        &state,
        &admin,
        CreateProductRequest {
            name: format!("{marker} deluxe"),
            description: "Full grain leather".into(),
            image_url: None,
            price: 9000,
            stock: Some(4),
            sizes: None,
        },
    )
    .await?;

    let query = ProductQuery {
        pagination: Pagination {
            page: None,
            per_page: None,
        },
        q: Some(marker.clone()),
        min_price: None,
        max_price: Some(5000),
        sort_by: None,
        sort_order: None,
    };
    let listing = product_service::list_products(&state, query).await?;
    let items = listing.data.expect("product list").items;
    assert_eq!(items.len(), 1);
    assert!(items[0].product.name.contains("classic"));

    let shopper = as_user(support::create_user(&state, "user").await?);
    let forbidden = product_service::create_product(
        &state,
        &shopper,
        CreateProductRequest {
            name: support::unique("rogue"),
            description: "Should not exist".into(),
            image_url: None,
            price: 100,
            stock: Some(1),
            sizes: None,
        },
    )
    .await;
    assert!(matches!(forbidden, Err(AppError::Forbidden)));

    Ok(())
}
