use log::*;
use mkt_common::Money;
use tempfile::TempDir;

use crate::{
    db_types::{Product, ProductId, ProductStatus, UserId},
    traits::ProductCatalog,
    SqliteDatabase,
};

/// A migrated SQLite database in a temporary directory. The directory is removed when this is dropped.
pub struct TestEnv {
    pub db: SqliteDatabase,
    _dir: TempDir,
}

pub async fn prepare_test_env() -> TestEnv {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let dir = tempfile::Builder::new().prefix("mkt_test_").tempdir().expect("Error creating temporary directory");
    let url = format!("sqlite://{}", dir.path().join("marketplace.db").display());
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating connection to database");
    db.migrate().await.expect("Error running DB migrations");
    debug!("🚀️ Test database ready at {url}");
    TestEnv { db, _dir: dir }
}

pub async fn seed_product(db: &SqliteDatabase, id: &str, seller: &str, price: i64, quantity: i64) -> Product {
    let product = Product {
        id: ProductId::from(id),
        name: format!("Product {id}"),
        seller_id: UserId::from(seller),
        price: Money::from(price),
        quantity,
        status: if quantity > 0 { ProductStatus::Available } else { ProductStatus::Sold },
    };
    db.upsert_product(product).await.expect("Error seeding product")
}
