//! Database migrations for the OPMS sync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_02_090000_create_catalog_tables;
mod m2025_06_02_090100_create_sync_jobs;
mod m2025_06_02_090200_create_opms_sync_queue;
mod m2025_06_02_090300_create_change_tracking;
mod m2025_06_02_090400_create_audit_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_02_090000_create_catalog_tables::Migration),
            Box::new(m2025_06_02_090100_create_sync_jobs::Migration),
            Box::new(m2025_06_02_090200_create_opms_sync_queue::Migration),
            Box::new(m2025_06_02_090300_create_change_tracking::Migration),
            Box::new(m2025_06_02_090400_create_audit_tables::Migration),
        ]
    }
}
