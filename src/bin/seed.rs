use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use boutique_api::{config::AppConfig, db::create_pool};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let admin_id = ensure_admin(&pool, "admin@example.com", "admin123").await?;
    let user_id = ensure_user(&pool, "user@example.com", "user123").await?;
    seed_products(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_admin(pool: &sqlx::PgPool, email: &str, password: &str) -> anyhow::Result<Uuid> {
    ensure_user_with_role(pool, email, password, "admin").await
}

async fn ensure_user(pool: &sqlx::PgPool, email: &str, password: &str) -> anyhow::Result<Uuid> {
    ensure_user_with_role(pool, email, password, "user").await
}

async fn ensure_user_with_role(
    pool: &sqlx::PgPool,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let row: (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (email, password_hash, role)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(row.0)
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    // (name, description, price, sizes). Empty sizes means flat stock.
    let products: Vec<(&str, &str, i64, Vec<(&str, i32)>)> = vec![
        (
            "Linen Summer Dress",
            "Lightweight linen dress",
            890_00,
            vec![("S", 10), ("M", 15), ("L", 8)],
        ),
        (
            "Classic Denim Jacket",
            "Stonewashed denim jacket",
            1290_00,
            vec![("S", 6), ("M", 12), ("L", 9), ("XL", 4)],
        ),
        (
            "Silk Scarf",
            "Hand-rolled silk scarf",
            450_00,
            vec![],
        ),
        (
            "Leather Tote Bag",
            "Full-grain leather tote",
            2190_00,
            vec![],
        ),
    ];

    for (name, desc, price, sizes) in products {
        let flat_stock = 25;
        let stock: i32 = if sizes.is_empty() {
            flat_stock
        } else {
            sizes.iter().map(|(_, s)| s).sum()
        };

        sqlx::query(
            r#"
            INSERT INTO products (name, description, price, stock)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(desc)
        .bind(price)
        .bind(stock)
        .execute(pool)
        .await?;

        let (product_id,): (Uuid,) = sqlx::query_as("SELECT id FROM products WHERE name = $1")
            .bind(name)
            .fetch_one(pool)
            .await?;

        for (label, size_stock) in sizes {
            sqlx::query(
                r#"
                INSERT INTO product_sizes (product_id, label, stock)
                VALUES ($1, $2, $3)
                ON CONFLICT (product_id, label) DO NOTHING
                "#,
            )
            .bind(product_id)
            .bind(label)
            .bind(size_stock)
            .execute(pool)
            .await?;
        }
    }

    println!("Seeded products");
    Ok(())
}
