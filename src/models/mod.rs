//! # Data Models
//!
//! SeaORM entities for the sync tables and the catalog tables the sync engine
//! touches, plus the typed vocabularies for their text and JSON columns.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod catalog_item;
pub mod change_log;
pub mod customer_price;
pub mod dry_run;
pub mod item_sync_status;
pub mod job_log;
pub mod queue_entry;
pub mod sync_item;
pub mod sync_job;
pub mod types;
pub mod vendor_cost;

pub use catalog_item::Entity as CatalogItem;
pub use change_log::Entity as ChangeLog;
pub use customer_price::Entity as CustomerPrice;
pub use dry_run::Entity as DryRun;
pub use item_sync_status::Entity as ItemSyncStatus;
pub use job_log::Entity as JobLog;
pub use queue_entry::Entity as QueueEntry;
pub use sync_item::Entity as SyncItem;
pub use sync_job::Entity as SyncJob;
pub use vendor_cost::Entity as VendorCost;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "opms-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
