//! # Catalog Store
//!
//! The sync engine's view of the legacy catalog: item lookup and the two
//! pricing sub-records (customer price, vendor cost) keyed by product id.
//!
//! Lookups run on the plain connection. Pricing writes and the post-write
//! re-read take the caller's transaction so the whole apply commits or rolls
//! back as one unit.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, Set,
};

use crate::models::{
    catalog_item::{self, Entity as CatalogItemEntity},
    customer_price::{self, Entity as CustomerPriceEntity},
    types::{PricingSnapshot, PricingValues},
    vendor_cost::{self, Entity as VendorCostEntity},
};

/// A catalog item with its current pricing sub-records.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingAggregate {
    pub item: catalog_item::Model,
    pub customer_price: Option<customer_price::Model>,
    pub vendor_cost: Option<vendor_cost::Model>,
}

impl PricingAggregate {
    pub fn snapshot(&self) -> PricingSnapshot {
        snapshot_of(self.customer_price.as_ref(), self.vendor_cost.as_ref())
    }
}

fn snapshot_of(
    price: Option<&customer_price::Model>,
    cost: Option<&vendor_cost::Model>,
) -> PricingSnapshot {
    PricingSnapshot {
        cut_price: price.map(|p| p.cut_price),
        roll_price: price.map(|p| p.roll_price),
        cut_cost: cost.map(|c| c.cut_cost),
        roll_cost: cost.map(|c| c.roll_cost),
    }
}

/// Catalog operations the sync engine depends on.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Item by business code, with its pricing sub-records.
    async fn find_pricing_by_code(
        &self,
        db: &DatabaseConnection,
        item_code: &str,
    ) -> Result<Option<PricingAggregate>, DbErr>;

    async fn find_item(
        &self,
        db: &DatabaseConnection,
        item_id: i64,
    ) -> Result<Option<catalog_item::Model>, DbErr>;

    /// Insert or update both sub-records for a product.
    async fn upsert_pricing(
        &self,
        txn: &DatabaseTransaction,
        product_id: i64,
        values: &PricingValues,
    ) -> Result<(), DbErr>;

    async fn read_pricing(
        &self,
        txn: &DatabaseTransaction,
        product_id: i64,
    ) -> Result<PricingSnapshot, DbErr>;
}

/// `CatalogStore` backed by the catalog tables.
#[derive(Debug, Clone, Default)]
pub struct SeaOrmCatalogStore;

#[async_trait]
impl CatalogStore for SeaOrmCatalogStore {
    async fn find_pricing_by_code(
        &self,
        db: &DatabaseConnection,
        item_code: &str,
    ) -> Result<Option<PricingAggregate>, DbErr> {
        let Some(item) = CatalogItemEntity::find()
            .filter(catalog_item::Column::Code.eq(item_code))
            .one(db)
            .await?
        else {
            return Ok(None);
        };

        let customer_price = CustomerPriceEntity::find_by_id(item.product_id)
            .one(db)
            .await?;
        let vendor_cost = VendorCostEntity::find_by_id(item.product_id).one(db).await?;

        Ok(Some(PricingAggregate {
            item,
            customer_price,
            vendor_cost,
        }))
    }

    async fn find_item(
        &self,
        db: &DatabaseConnection,
        item_id: i64,
    ) -> Result<Option<catalog_item::Model>, DbErr> {
        CatalogItemEntity::find_by_id(item_id).one(db).await
    }

    async fn upsert_pricing(
        &self,
        txn: &DatabaseTransaction,
        product_id: i64,
        values: &PricingValues,
    ) -> Result<(), DbErr> {
        let now = Utc::now().fixed_offset();

        match CustomerPriceEntity::find_by_id(product_id).one(txn).await? {
            Some(existing) => {
                let mut active: customer_price::ActiveModel = existing.into();
                active.cut_price = Set(values.cut_price);
                active.roll_price = Set(values.roll_price);
                active.updated_at = Set(now);
                active.update(txn).await?;
            }
            None => {
                customer_price::ActiveModel {
                    product_id: Set(product_id),
                    cut_price: Set(values.cut_price),
                    roll_price: Set(values.roll_price),
                    updated_at: Set(now),
                }
                .insert(txn)
                .await?;
            }
        }

        match VendorCostEntity::find_by_id(product_id).one(txn).await? {
            Some(existing) => {
                let mut active: vendor_cost::ActiveModel = existing.into();
                active.cut_cost = Set(values.cut_cost);
                active.roll_cost = Set(values.roll_cost);
                active.updated_at = Set(now);
                active.update(txn).await?;
            }
            None => {
                vendor_cost::ActiveModel {
                    product_id: Set(product_id),
                    cut_cost: Set(values.cut_cost),
                    roll_cost: Set(values.roll_cost),
                    updated_at: Set(now),
                }
                .insert(txn)
                .await?;
            }
        }

        Ok(())
    }

    async fn read_pricing(
        &self,
        txn: &DatabaseTransaction,
        product_id: i64,
    ) -> Result<PricingSnapshot, DbErr> {
        let price = CustomerPriceEntity::find_by_id(product_id).one(txn).await?;
        let cost = VendorCostEntity::find_by_id(product_id).one(txn).await?;
        Ok(snapshot_of(price.as_ref(), cost.as_ref()))
    }
}
