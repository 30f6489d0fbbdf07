use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum BusinessListings {
    Table,
    Id,
    SourceSite,
    Title,
    AskingPrice,
    AnnualRevenue,
    CashFlow,
    ValuationMultiple,
    Industry,
    Location,
    Description,
    ListingUrl,
    ScrapedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BusinessListings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BusinessListings::Id)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(BusinessListings::SourceSite)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(BusinessListings::Title).text().not_null())
                    .col(ColumnDef::new(BusinessListings::AskingPrice).double())
                    .col(ColumnDef::new(BusinessListings::AnnualRevenue).double())
                    .col(ColumnDef::new(BusinessListings::CashFlow).double())
                    .col(ColumnDef::new(BusinessListings::ValuationMultiple).double())
                    .col(ColumnDef::new(BusinessListings::Industry).string_len(256))
                    .col(ColumnDef::new(BusinessListings::Location).string_len(256))
                    .col(ColumnDef::new(BusinessListings::Description).text())
                    .col(ColumnDef::new(BusinessListings::ListingUrl).string_len(1024))
                    .col(ColumnDef::new(BusinessListings::ScrapedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_business_listings_scraped_at")
                    .table(BusinessListings::Table)
                    .col(BusinessListings::ScrapedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_business_listings_price")
                    .table(BusinessListings::Table)
                    .col(BusinessListings::AskingPrice)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BusinessListings::Table).to_owned())
            .await
    }
}
