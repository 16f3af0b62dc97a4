use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{CheckoutRequest, OrderList, OrderWithItems},
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        product_sizes::{Column as SizeCol, Entity as ProductSizes},
        products::Entity as Products,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, order_status},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Turn the cart into a `pending_payment` order. Stock is only validated
/// here; the decrement itself belongs to payment confirmation, where it
/// happens exactly once.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    if payload.customer_name.trim().is_empty() {
        return Err(AppError::BadRequest("customer name is required".into()));
    }
    if payload.shipping_address.trim().is_empty() {
        return Err(AppError::BadRequest("shipping address is required".into()));
    }

    let txn = state.orm.begin().await?;

    let rows = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .find_also_related(Products)
        .all(&txn)
        .await?;

    if rows.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let mut subtotal: i64 = 0;
    for (cart, product) in &rows {
        let product = product.as_ref().ok_or(AppError::NotFound)?;
        if cart.quantity <= 0 {
            return Err(AppError::BadRequest("Cart has invalid quantity".into()));
        }
        let available = match cart.size.as_deref() {
            Some(label) => {
                let size = ProductSizes::find()
                    .filter(SizeCol::ProductId.eq(cart.product_id))
                    .filter(SizeCol::Label.eq(label))
                    .one(&txn)
                    .await?;
                match size {
                    Some(s) => s.stock,
                    None => {
                        return Err(AppError::BadRequest(format!(
                            "size {label} is not available for {}",
                            product.name
                        )));
                    }
                }
            }
            None => product.stock,
        };
        if available < cart.quantity {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for {}",
                product.name
            )));
        }
        subtotal += product.price * (cart.quantity as i64);
    }

    let shipping_cost = state.config.shipping_flat_rate;

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        customer_name: Set(payload.customer_name),
        customer_email: Set(payload.customer_email),
        customer_mobile: Set(payload.customer_mobile),
        shipping_address: Set(payload.shipping_address),
        total_amount: Set(subtotal + shipping_cost),
        shipping_cost: Set(shipping_cost),
        status: Set(order_status::PENDING_PAYMENT.into()),
        payment_session_id: Set(None),
        payment_transaction_id: Set(None),
        drop_reason: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut order_items: Vec<OrderItem> = Vec::new();

    for (cart, product) in &rows {
        let product = product.as_ref().ok_or(AppError::NotFound)?;
        // Price, name and image are snapshotted so later catalog edits do
        // not rewrite order history.
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(cart.product_id),
            size: Set(cart.size.clone()),
            quantity: Set(cart.quantity),
            unit_price: Set(product.price),
            product_name: Set(product.name.clone()),
            product_image: Set(product.image_url.clone()),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;

        order_items.push(order_item_from_entity(item));
    }

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Checkout created, awaiting payment",
        OrderWithItems {
            order: order_from_entity(order),
            items: order_items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        customer_name: model.customer_name,
        customer_email: model.customer_email,
        customer_mobile: model.customer_mobile,
        shipping_address: model.shipping_address,
        total_amount: model.total_amount,
        shipping_cost: model.shipping_cost,
        status: model.status,
        payment_session_id: model.payment_session_id,
        payment_transaction_id: model.payment_transaction_id,
        drop_reason: model.drop_reason,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        size: model.size,
        quantity: model.quantity,
        unit_price: model.unit_price,
        product_name: model.product_name,
        product_image: model.product_image,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
