//! Migration to create the catalog tables touched by pricing sync.
//!
//! In production these are the legacy OPMS product tables; only the columns the
//! sync engine reads or writes are modelled here.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CatalogItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CatalogItems::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CatalogItems::ProductId).big_integer().not_null())
                    .col(ColumnDef::new(CatalogItems::Code).text().not_null())
                    .col(
                        ColumnDef::new(CatalogItems::Archived)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_catalog_items_code")
                    .table(CatalogItems::Table)
                    .col(CatalogItems::Code)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CatalogCustomerPrices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CatalogCustomerPrices::ProductId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CatalogCustomerPrices::CutPrice).double().not_null())
                    .col(ColumnDef::new(CatalogCustomerPrices::RollPrice).double().not_null())
                    .col(
                        ColumnDef::new(CatalogCustomerPrices::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CatalogVendorCosts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CatalogVendorCosts::ProductId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CatalogVendorCosts::CutCost).double().not_null())
                    .col(ColumnDef::new(CatalogVendorCosts::RollCost).double().not_null())
                    .col(
                        ColumnDef::new(CatalogVendorCosts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CatalogVendorCosts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CatalogCustomerPrices::Table).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_catalog_items_code").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CatalogItems::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CatalogItems {
    Table,
    Id,
    ProductId,
    Code,
    Archived,
}

#[derive(DeriveIden)]
enum CatalogCustomerPrices {
    Table,
    ProductId,
    CutPrice,
    RollPrice,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CatalogVendorCosts {
    Table,
    ProductId,
    CutCost,
    RollCost,
    UpdatedAt,
}
