//! # Pricing Sync
//!
//! Applies ERP pricing to the catalog: four fields written across the
//! customer-price and vendor-cost sub-records as one transaction.
//!
//! Order of checks is fixed. The skip flag is honoured before anything is
//! read or validated, then fields are validated, then the item is resolved,
//! and only then is a transaction opened.

use std::sync::Arc;

use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::error::SyncError;
use crate::models::types::{
    PricingSnapshot, PricingSyncRequest, PricingValues, RawPricingFields, SyncFields,
};
use crate::repositories::catalog::{CatalogStore, PricingAggregate};

/// ERP flag marking items whose pricing is managed outside the sync.
pub const SKIP_FLAG: &str = "custitemf3_lisa_item";

pub fn skip_reason() -> String {
    format!("item is flagged {}; pricing sync skipped", SKIP_FLAG)
}

/// Catalog records a pricing change was applied to.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PricingTarget {
    pub item_id: i64,
    pub product_id: i64,
    pub item_code: String,
}

impl From<&PricingAggregate> for PricingTarget {
    fn from(aggregate: &PricingAggregate) -> Self {
        Self {
            item_id: aggregate.item.id,
            product_id: aggregate.item.product_id,
            item_code: aggregate.item.code.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PricingOutcome {
    Updated {
        /// `None` when neither sub-record existed before the apply
        before: Option<PricingSnapshot>,
        after: PricingSnapshot,
        target: PricingTarget,
        /// The four values as written
        fields: SyncFields,
    },
    Skipped {
        reason: String,
    },
}

/// What an apply would write, computed without touching the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum PricingPreview {
    Ready {
        target: PricingTarget,
        before: Option<PricingSnapshot>,
        fields: SyncFields,
    },
    Skipped {
        reason: String,
    },
}

/// Check that every field is a finite, non-negative number.
///
/// All offending fields are reported together.
pub fn validate_fields(fields: &RawPricingFields) -> Result<PricingValues, SyncError> {
    let mut problems = Map::new();
    let mut parsed = [0.0_f64; 4];

    for (slot, (name, value)) in parsed.iter_mut().zip(fields.named()) {
        match value.as_f64() {
            Some(number) if number.is_finite() && number >= 0.0 => *slot = number,
            Some(number) => {
                problems.insert(
                    name.to_string(),
                    JsonValue::String(format!("must not be negative (got {})", number)),
                );
            }
            None => {
                problems.insert(
                    name.to_string(),
                    JsonValue::String(format!("must be a number (got {})", value)),
                );
            }
        }
    }

    if !problems.is_empty() {
        let names = problems.keys().cloned().collect::<Vec<_>>().join(", ");
        return Err(
            SyncError::validation(format!("invalid pricing fields: {}", names))
                .with_details(json!({ "fields": problems })),
        );
    }

    let [cut_price, roll_price, cut_cost, roll_cost] = parsed;
    Ok(PricingValues {
        cut_price,
        roll_price,
        cut_cost,
        roll_cost,
    })
}

/// Applies ERP pricing to catalog items.
#[derive(Clone)]
pub struct PricingSyncEngine {
    db: DatabaseConnection,
    catalog: Arc<dyn CatalogStore>,
}

impl PricingSyncEngine {
    pub fn new(db: DatabaseConnection, catalog: Arc<dyn CatalogStore>) -> Self {
        Self { db, catalog }
    }

    #[instrument(skip(self, request), fields(item_code = %request.item_code, skip = request.skip))]
    pub async fn apply(&self, request: &PricingSyncRequest) -> Result<PricingOutcome, SyncError> {
        if request.skip {
            info!("Pricing sync skipped by item flag");
            return Ok(PricingOutcome::Skipped {
                reason: skip_reason(),
            });
        }

        let values = validate_fields(&request.fields)?;
        let aggregate = self.resolve(&request.item_code).await?;
        let target = PricingTarget::from(&aggregate);
        let before = aggregate.snapshot();

        let txn = self.db.begin().await?;
        let after = match self.write(&txn, target.product_id, &values).await {
            Ok(after) => after,
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed pricing apply also failed");
                }
                return Err(err);
            }
        };
        txn.commit().await?;

        info!(
            item_id = target.item_id,
            product_id = target.product_id,
            "Pricing applied"
        );

        Ok(PricingOutcome::Updated {
            before: (!before.is_empty()).then_some(before),
            after,
            target,
            fields: SyncFields::from(values),
        })
    }

    /// Run the checks of [`Self::apply`] and return the field set it would write.
    pub async fn preview(&self, request: &PricingSyncRequest) -> Result<PricingPreview, SyncError> {
        if request.skip {
            return Ok(PricingPreview::Skipped {
                reason: skip_reason(),
            });
        }

        let values = validate_fields(&request.fields)?;
        let aggregate = self.resolve(&request.item_code).await?;
        let before = aggregate.snapshot();

        Ok(PricingPreview::Ready {
            target: PricingTarget::from(&aggregate),
            before: (!before.is_empty()).then_some(before),
            fields: SyncFields::from(values),
        })
    }

    /// The catalog item `item_code` refers to, if any. Ignores the skip flag
    /// and field validity.
    pub async fn locate(&self, item_code: &str) -> Result<Option<PricingTarget>, SyncError> {
        Ok(self
            .catalog
            .find_pricing_by_code(&self.db, item_code)
            .await?
            .as_ref()
            .map(PricingTarget::from))
    }

    async fn resolve(&self, item_code: &str) -> Result<PricingAggregate, SyncError> {
        self.catalog
            .find_pricing_by_code(&self.db, item_code)
            .await?
            .ok_or_else(|| {
                SyncError::not_found(format!("catalog item '{}' not found", item_code))
            })
    }

    async fn write(
        &self,
        txn: &DatabaseTransaction,
        product_id: i64,
        values: &PricingValues,
    ) -> Result<PricingSnapshot, SyncError> {
        self.catalog.upsert_pricing(txn, product_id, values).await?;
        Ok(self.catalog.read_pricing(txn, product_id).await?)
    }
}
