use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Deals {
    Table,
    Id,
    UserId,
    ListingId,
    BusinessName,
    Stage,
    Priority,
    AskingPriceCents,
    AnnualRevenueCents,
    CashFlowCents,
    Multiple,
    Industry,
    Location,
    Source,
    BrokerName,
    BrokerEmail,
    BrokerPhone,
    ListingUrl,
    Notes,
    ExpectedCloseDate,
    CustomFields,
    StageChangedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DealStageHistory {
    Table,
    Id,
    DealId,
    FromStage,
    ToStage,
    ChangedAt,
    Note,
    ChangedBy,
}

#[derive(DeriveIden)]
enum StageMeta {
    Table,
    Key,
    DisplayName,
    SortOrder,
    Probability,
    IsWon,
    IsLost,
}

const DEFAULT_STAGE_META: [(&str, &str, i16, i16, bool, bool); 8] = [
    ("prospecting", "Prospecting", 10, 5, false, false),
    ("initial_contact", "Initial Contact", 20, 10, false, false),
    ("nda_signed", "NDA Signed", 30, 20, false, false),
    ("due_diligence", "Due Diligence", 40, 40, false, false),
    ("loi_submitted", "LOI Submitted", 50, 60, false, false),
    ("under_contract", "Under Contract", 60, 80, false, false),
    ("closed_won", "Closed Won", 90, 100, true, false),
    ("closed_lost", "Closed Lost", 95, 0, false, true),
];

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Deals::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Deals::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Deals::UserId).uuid().not_null())
                    .col(ColumnDef::new(Deals::ListingId).string_len(128))
                    .col(ColumnDef::new(Deals::BusinessName).string_len(256).not_null())
                    .col(
                        ColumnDef::new(Deals::Stage)
                            .string_len(32)
                            .not_null()
                            .default("prospecting"),
                    )
                    .col(
                        ColumnDef::new(Deals::Priority)
                            .string_len(16)
                            .not_null()
                            .default("medium"),
                    )
                    .col(ColumnDef::new(Deals::AskingPriceCents).big_integer())
                    .col(ColumnDef::new(Deals::AnnualRevenueCents).big_integer())
                    .col(ColumnDef::new(Deals::CashFlowCents).big_integer())
                    .col(ColumnDef::new(Deals::Multiple).double())
                    .col(ColumnDef::new(Deals::Industry).string_len(256))
                    .col(ColumnDef::new(Deals::Location).string_len(256))
                    .col(ColumnDef::new(Deals::Source).string_len(256))
                    .col(ColumnDef::new(Deals::BrokerName).string_len(256))
                    .col(ColumnDef::new(Deals::BrokerEmail).string_len(256))
                    .col(ColumnDef::new(Deals::BrokerPhone).string_len(64))
                    .col(ColumnDef::new(Deals::ListingUrl).string_len(1024))
                    .col(ColumnDef::new(Deals::Notes).text())
                    .col(ColumnDef::new(Deals::ExpectedCloseDate).date())
                    .col(ColumnDef::new(Deals::CustomFields).json_binary().not_null())
                    .col(
                        ColumnDef::new(Deals::StageChangedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Deals::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Deals::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deals_user_stage")
                    .table(Deals::Table)
                    .col(Deals::UserId)
                    .col(Deals::Stage)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deals_user_listing")
                    .table(Deals::Table)
                    .col(Deals::UserId)
                    .col(Deals::ListingId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DealStageHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DealStageHistory::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DealStageHistory::DealId).uuid().not_null())
                    .col(ColumnDef::new(DealStageHistory::FromStage).string_len(32))
                    .col(
                        ColumnDef::new(DealStageHistory::ToStage)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DealStageHistory::ChangedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(DealStageHistory::Note).text())
                    .col(ColumnDef::new(DealStageHistory::ChangedBy).uuid())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_stage_history_deal")
                            .from(DealStageHistory::Table, DealStageHistory::DealId)
                            .to(Deals::Table, Deals::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deal_stage_history_deal")
                    .table(DealStageHistory::Table)
                    .col(DealStageHistory::DealId)
                    .col(DealStageHistory::ChangedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(StageMeta::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StageMeta::Key)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(StageMeta::DisplayName)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StageMeta::SortOrder)
                            .small_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(StageMeta::Probability)
                            .small_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StageMeta::IsWon)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(StageMeta::IsLost)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        for (key, display_name, sort_order, probability, is_won, is_lost) in DEFAULT_STAGE_META {
            let stmt = Query::insert()
                .into_table(StageMeta::Table)
                .columns([
                    StageMeta::Key,
                    StageMeta::DisplayName,
                    StageMeta::SortOrder,
                    StageMeta::Probability,
                    StageMeta::IsWon,
                    StageMeta::IsLost,
                ])
                .values_panic([
                    key.into(),
                    display_name.into(),
                    sort_order.into(),
                    probability.into(),
                    is_won.into(),
                    is_lost.into(),
                ])
                .on_conflict(OnConflict::column(StageMeta::Key).do_nothing().to_owned())
                .to_owned();
            manager.exec_stmt(stmt).await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StageMeta::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DealStageHistory::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Deals::Table).to_owned())
            .await
    }
}
