use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Product, ProductSize};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SizeInput {
    pub label: String,
    pub stock: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: String,
    pub image_url: Option<String>,
    pub price: i64,
    /// Flat stock for products without size variants. Ignored when `sizes`
    /// is present, where the aggregate is derived from the variants.
    pub stock: Option<i32>,
    pub sizes: Option<Vec<SizeInput>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<i64>,
    pub stock: Option<i32>,
    /// When present, replaces the whole size-variant set.
    pub sizes: Option<Vec<SizeInput>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductDetail {
    pub product: Product,
    pub sizes: Vec<ProductSize>,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct ProductList {
    #[schema(value_type = Vec<ProductDetail>)]
    pub items: Vec<ProductDetail>,
}
