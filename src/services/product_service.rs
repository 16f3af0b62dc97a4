use std::collections::HashSet;

use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, LoaderTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::dto::products::{
    CreateProductRequest, ProductDetail, ProductList, SizeInput, UpdateProductRequest,
};
use crate::{
    audit::log_audit,
    entity::{
        product_sizes::{
            ActiveModel as SizeActive, Column as SizeCol, Entity as ProductSizes,
            Model as SizeModel,
        },
        products::{ActiveModel, Column, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Product, ProductSize},
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all();

    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(Column::Name).ilike(pattern.clone()))
                .add(Expr::col(Column::Description).ilike(pattern)),
        );
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Name => Column::Name,
    };

    let mut finder = Products::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let products = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let size_sets = products.load_many(ProductSizes, &state.orm).await?;

    let items = products
        .into_iter()
        .zip(size_sets)
        .map(|(product, sizes)| ProductDetail {
            product: product_from_entity(product),
            sizes: sizes.into_iter().map(size_from_entity).collect(),
        })
        .collect();

    let meta = Meta::new(page, limit, total);
    let data = ProductList { items };
    Ok(ApiResponse::success("Products", data, Some(meta)))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<ProductDetail>> {
    let product = Products::find_by_id(id).one(&state.orm).await?;
    let product = match product {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let sizes = ProductSizes::find()
        .filter(SizeCol::ProductId.eq(id))
        .order_by_asc(SizeCol::Label)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(size_from_entity)
        .collect();

    let data = ProductDetail {
        product: product_from_entity(product),
        sizes,
    };
    Ok(ApiResponse::success("Product", data, None))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<ProductDetail>> {
    ensure_admin(user)?;

    let sizes = payload.sizes.unwrap_or_default();
    validate_sizes(&sizes)?;

    let aggregate = if sizes.is_empty() {
        payload.stock.unwrap_or(0)
    } else {
        sizes.iter().map(|s| s.stock).sum()
    };
    if aggregate < 0 {
        return Err(AppError::BadRequest("stock must not be negative".into()));
    }

    let txn = state.orm.begin().await?;

    let product = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(payload.name),
        description: Set(Some(payload.description)),
        image_url: Set(payload.image_url),
        price: Set(payload.price),
        stock: Set(aggregate),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut size_models = Vec::new();
    for s in sizes {
        let model = SizeActive {
            id: Set(Uuid::new_v4()),
            product_id: Set(product.id),
            label: Set(s.label),
            stock: Set(s.stock),
        }
        .insert(&txn)
        .await?;
        size_models.push(size_from_entity(model));
    }

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_create",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Product created",
        ProductDetail {
            product: product_from_entity(product),
            sizes: size_models,
        },
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<ProductDetail>> {
    ensure_admin(user)?;

    if let Some(sizes) = payload.sizes.as_deref() {
        validate_sizes(sizes)?;
    }

    let txn = state.orm.begin().await?;

    let existing = Products::find_by_id(id).one(&txn).await?;
    let existing = match existing {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let had_sizes = ProductSizes::find()
        .filter(SizeCol::ProductId.eq(id))
        .count(&txn)
        .await?
        > 0;
    if payload.stock.is_some() && payload.sizes.is_none() && had_sizes {
        return Err(AppError::BadRequest(
            "stock is derived from sizes for sized products".into(),
        ));
    }

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(image_url) = payload.image_url {
        active.image_url = Set(Some(image_url));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(sizes) = payload.sizes.as_deref() {
        active.stock = Set(sizes.iter().map(|s| s.stock).sum());
    } else if let Some(stock) = payload.stock {
        if stock < 0 {
            return Err(AppError::BadRequest("stock must not be negative".into()));
        }
        active.stock = Set(stock);
    }

    let product = active.update(&txn).await?;

    let size_models: Vec<ProductSize> = if let Some(sizes) = payload.sizes {
        ProductSizes::delete_many()
            .filter(SizeCol::ProductId.eq(id))
            .exec(&txn)
            .await?;
        let mut out = Vec::new();
        for s in sizes {
            let model = SizeActive {
                id: Set(Uuid::new_v4()),
                product_id: Set(id),
                label: Set(s.label),
                stock: Set(s.stock),
            }
            .insert(&txn)
            .await?;
            out.push(size_from_entity(model));
        }
        out
    } else {
        ProductSizes::find()
            .filter(SizeCol::ProductId.eq(id))
            .order_by_asc(SizeCol::Label)
            .all(&txn)
            .await?
            .into_iter()
            .map(size_from_entity)
            .collect()
    };

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_update",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Updated",
        ProductDetail {
            product: product_from_entity(product),
            sizes: size_models,
        },
        Some(Meta::empty()),
    ))
}

pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Products::delete_by_id(id).exec(&state.orm).await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_delete",
        Some("products"),
        Some(serde_json::json!({ "product_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn validate_sizes(sizes: &[SizeInput]) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    for s in sizes {
        if s.label.trim().is_empty() {
            return Err(AppError::BadRequest("size label must not be empty".into()));
        }
        if s.stock < 0 {
            return Err(AppError::BadRequest(
                "size stock must not be negative".into(),
            ));
        }
        if !seen.insert(s.label.as_str()) {
            return Err(AppError::BadRequest(format!(
                "duplicate size label {}",
                s.label
            )));
        }
    }
    Ok(())
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

fn size_from_entity(model: SizeModel) -> ProductSize {
    ProductSize {
        id: model.id,
        product_id: model.product_id,
        label: model.label,
        stock: model.stock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_size_labels() {
        let sizes = vec![
            SizeInput {
                label: "M".into(),
                stock: 3,
            },
            SizeInput {
                label: "M".into(),
                stock: 5,
            },
        ];
        assert!(validate_sizes(&sizes).is_err());
    }

    #[test]
    fn rejects_negative_size_stock() {
        let sizes = vec![SizeInput {
            label: "L".into(),
            stock: -1,
        }];
        assert!(validate_sizes(&sizes).is_err());
    }

    #[test]
    fn accepts_distinct_labels() {
        let sizes = vec![
            SizeInput {
                label: "S".into(),
                stock: 0,
            },
            SizeInput {
                label: "M".into(),
                stock: 2,
            },
        ];
        assert!(validate_sizes(&sizes).is_ok());
    }
}
