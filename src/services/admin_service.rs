use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, LoaderTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{OrderList, OrderWithItems},
    dto::products::ProductDetail,
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems, Model as OrderItemModel},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        product_sizes::{
            ActiveModel as SizeActive, Column as SizeCol, Entity as ProductSizes,
        },
        products::{ActiveModel as ProductActive, Column as ProdCol, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderItem, Product, ProductSize, order_status},
    response::{ApiResponse, Meta},
    routes::admin::{InventoryAdjustRequest, LowStockList, LowStockQuery, UpdateOrderStatusRequest},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let mut finder = Orders::find().filter(condition);

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
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

    let order_list = OrderList { items: orders };

    Ok(ApiResponse::success("Orders", order_list, Some(meta)))
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .map(order_from_entity);
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

    let data = OrderWithItems { order, items };
    Ok(ApiResponse::success(
        "Order found",
        data,
        Some(Meta::empty()),
    ))
}

/// Fulfilment transitions only. `payment_confirmed` is owned by the payment
/// verification path and cannot be set by hand, which also keeps manual
/// edits from skipping the stock decrement.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    if !order_status::is_valid(&payload.status) {
        return Err(AppError::BadRequest("Invalid order status".into()));
    }
    if payload.status == order_status::PAYMENT_CONFIRMED {
        return Err(AppError::BadRequest(
            "payment_confirmed is set by payment verification only".into(),
        ));
    }

    let existing = Orders::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let mut active: OrderActive = existing.into();
    active.status = Set(payload.status);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "status": order.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order updated",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

pub async fn list_low_stock(
    state: &AppState,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<LowStockList>> {
    ensure_admin(user)?;
    let threshold = query.threshold.unwrap_or(5);
    let (page, limit, offset) = query.pagination.normalize();

    let mut finder = Products::find().filter(ProdCol::Stock.lte(threshold));
    finder = finder
        .order_by_asc(ProdCol::Stock)
        .order_by_desc(ProdCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;

    let products = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    // Size rows show which variant actually ran out.
    let size_sets = products.load_many(ProductSizes, &state.orm).await?;

    let items = products
        .into_iter()
        .zip(size_sets)
        .map(|(product, sizes)| ProductDetail {
            product: product_from_entity(product),
            sizes: sizes.into_iter().map(size_from_entity).collect(),
        })
        .collect();

    let data = LowStockList { items };
    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Low stock", data, Some(meta)))
}

/// Manual restock or correction. Sized products are adjusted per variant so
/// the aggregate stays the sum of its parts.
pub async fn adjust_inventory(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: InventoryAdjustRequest,
) -> AppResult<ApiResponse<ProductDetail>> {
    ensure_admin(user)?;
    if payload.delta == 0 {
        return Err(AppError::BadRequest("delta must not be 0".into()));
    }

    let txn = state.orm.begin().await?;
    let product = Products::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let product = match product {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let has_sizes = ProductSizes::find()
        .filter(SizeCol::ProductId.eq(id))
        .count(&txn)
        .await?
        > 0;

    match payload.size.as_deref() {
        Some(label) => {
            let size = ProductSizes::find()
                .filter(SizeCol::ProductId.eq(id))
                .filter(SizeCol::Label.eq(label))
                .lock(LockType::Update)
                .one(&txn)
                .await?;
            let size = match size {
                Some(s) => s,
                None => {
                    return Err(AppError::BadRequest(format!(
                        "size {label} not found for this product"
                    )));
                }
            };

            let new_size_stock = size.stock + payload.delta;
            if new_size_stock < 0 {
                return Err(AppError::BadRequest("stock cannot be negative".into()));
            }

            let mut size_active: SizeActive = size.into();
            size_active.stock = Set(new_size_stock);
            size_active.update(&txn).await?;
        }
        None => {
            if has_sizes {
                return Err(AppError::BadRequest(
                    "specify a size when adjusting a sized product".into(),
                ));
            }
        }
    }

    let new_stock = product.stock + payload.delta;
    if new_stock < 0 {
        return Err(AppError::BadRequest("stock cannot be negative".into()));
    }

    let mut active: ProductActive = product.into();
    active.stock = Set(new_stock);
    let updated = active.update(&txn).await?;

    let sizes = ProductSizes::find()
        .filter(SizeCol::ProductId.eq(id))
        .order_by_asc(SizeCol::Label)
        .all(&txn)
        .await?
        .into_iter()
        .map(size_from_entity)
        .collect();

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "inventory_adjust",
        Some("products"),
        Some(serde_json::json!({
            "product_id": updated.id,
            "size": payload.size,
            "delta": payload.delta,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Inventory updated",
        ProductDetail {
            product: product_from_entity(updated),
            sizes,
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

fn product_from_entity(model: ProductModel) -> Product {
    Product {
        id: model.id,
        name: model.name,
        description: model.description,
        image_url: model.image_url,
        price: model.price,
        stock: model.stock,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn size_from_entity(model: crate::entity::product_sizes::Model) -> ProductSize {
    ProductSize {
        id: model.id,
        product_id: model.product_id,
        label: model.label,
        stock: model.stock,
    }
}
