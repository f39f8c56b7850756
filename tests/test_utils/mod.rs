//! Test utilities for database testing.
//!
//! In-memory SQLite with all migrations applied, plus catalog fixtures.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use opms_sync::config::AppConfig;
use opms_sync::queue::{DbSyncQueue, SyncQueue};
use opms_sync::repositories::SeaOrmCatalogStore;
use opms_sync::server::{AppState, create_app};
use opms_sync::models::{
    CustomerPrice, VendorCost, catalog_item, customer_price, types::PricingSnapshot, vendor_cost,
};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Set, Statement,
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

pub const OPERATOR_TOKEN: &str = "test-operator-token";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;

    Migrator::up(&db, None).await?;

    // Fixtures insert catalog rows without their legacy parents.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

/// Configuration accepted by the loader's validation in the test profile.
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        webhook_max_body_kb: 4,
        ..Default::default()
    }
}

pub fn test_config_arc() -> Arc<AppConfig> {
    Arc::new(test_config())
}

/// Inserts a catalog item with no pricing rows.
pub async fn insert_item(
    db: &DatabaseConnection,
    id: i64,
    product_id: i64,
    code: &str,
) -> Result<catalog_item::Model> {
    Ok(catalog_item::ActiveModel {
        id: Set(id),
        product_id: Set(product_id),
        code: Set(code.to_string()),
        archived: Set(false),
    }
    .insert(db)
    .await?)
}

pub async fn insert_archived_item(
    db: &DatabaseConnection,
    id: i64,
    product_id: i64,
    code: &str,
) -> Result<catalog_item::Model> {
    Ok(catalog_item::ActiveModel {
        id: Set(id),
        product_id: Set(product_id),
        code: Set(code.to_string()),
        archived: Set(true),
    }
    .insert(db)
    .await?)
}

/// Inserts both pricing sub-records for a product.
pub async fn insert_pricing(
    db: &DatabaseConnection,
    product_id: i64,
    cut_price: f64,
    roll_price: f64,
    cut_cost: f64,
    roll_cost: f64,
) -> Result<()> {
    let now = Utc::now().fixed_offset();
    customer_price::ActiveModel {
        product_id: Set(product_id),
        cut_price: Set(cut_price),
        roll_price: Set(roll_price),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;
    vendor_cost::ActiveModel {
        product_id: Set(product_id),
        cut_cost: Set(cut_cost),
        roll_cost: Set(roll_cost),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Reads the stored pricing for a product straight from the tables.
pub async fn stored_pricing(db: &DatabaseConnection, product_id: i64) -> Result<PricingSnapshot> {
    let price = CustomerPrice::find_by_id(product_id).one(db).await?;
    let cost = VendorCost::find_by_id(product_id).one(db).await?;
    Ok(PricingSnapshot {
        cut_price: price.as_ref().map(|p| p.cut_price),
        roll_price: price.as_ref().map(|p| p.roll_price),
        cut_cost: cost.as_ref().map(|c| c.cut_cost),
        roll_cost: cost.as_ref().map(|c| c.roll_cost),
    })
}

/// A running HTTP server bound to a random local port.
pub struct TestServer {
    pub url: String,
    pub db: DatabaseConnection,
    pub queue: Arc<dyn SyncQueue>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl TestServer {
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.join_handle.take() {
            handle.await.context("server task join failed")??;
        }
        Ok(())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Spawns the full router over a fresh database.
pub async fn spawn_test_app(config: AppConfig) -> TestServer {
    let db = setup_test_db().await.unwrap();
    spawn_test_app_with_db(config, db).await
}

pub async fn spawn_test_app_with_db(config: AppConfig, db: DatabaseConnection) -> TestServer {
    let queue: Arc<dyn SyncQueue> = Arc::new(DbSyncQueue::new(db.clone()));
    let state = AppState::new(
        Arc::new(config),
        db.clone(),
        queue.clone(),
        Arc::new(SeaOrmCatalogStore),
    );
    let app = create_app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let join_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .context("axum server error")
    });

    TestServer {
        url: format!("http://{}", addr),
        db,
        queue,
        shutdown_tx: Some(shutdown_tx),
        join_handle: Some(join_handle),
    }
}
