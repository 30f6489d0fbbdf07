use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Deals {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum DealTasks {
    Table,
    Id,
    DealId,
    UserId,
    Title,
    Description,
    Status,
    Priority,
    DueDate,
    SortOrder,
    CompletedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DealDocuments {
    Table,
    Id,
    DealId,
    UserId,
    FileName,
    ContentType,
    SizeBytes,
    Category,
    Description,
    StoragePath,
    UploadedAt,
}

#[derive(DeriveIden)]
enum DealCommunications {
    Table,
    Id,
    DealId,
    UserId,
    Channel,
    Direction,
    Subject,
    Body,
    Counterparty,
    ThreadId,
    OccurredAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Favorites {
    Table,
    UserId,
    ListingId,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DealTasks::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(DealTasks::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(DealTasks::DealId).uuid().not_null())
                    .col(ColumnDef::new(DealTasks::UserId).uuid().not_null())
                    .col(ColumnDef::new(DealTasks::Title).string_len(256).not_null())
                    .col(ColumnDef::new(DealTasks::Description).text())
                    .col(
                        ColumnDef::new(DealTasks::Status)
                            .string_len(16)
                            .not_null()
                            .default("todo"),
                    )
                    .col(
                        ColumnDef::new(DealTasks::Priority)
                            .string_len(16)
                            .not_null()
                            .default("medium"),
                    )
                    .col(ColumnDef::new(DealTasks::DueDate).date())
                    .col(
                        ColumnDef::new(DealTasks::SortOrder)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(DealTasks::CompletedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(DealTasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DealTasks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_tasks_deal")
                            .from(DealTasks::Table, DealTasks::DealId)
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
                    .name("idx_deal_tasks_board")
                    .table(DealTasks::Table)
                    .col(DealTasks::DealId)
                    .col(DealTasks::Status)
                    .col(DealTasks::SortOrder)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DealDocuments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DealDocuments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DealDocuments::DealId).uuid().not_null())
                    .col(ColumnDef::new(DealDocuments::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(DealDocuments::FileName)
                            .string_len(512)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DealDocuments::ContentType)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DealDocuments::SizeBytes)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DealDocuments::Category).string_len(64))
                    .col(ColumnDef::new(DealDocuments::Description).text())
                    .col(
                        ColumnDef::new(DealDocuments::StoragePath)
                            .string_len(1024)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(DealDocuments::UploadedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_documents_deal")
                            .from(DealDocuments::Table, DealDocuments::DealId)
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
                    .name("idx_deal_documents_deal")
                    .table(DealDocuments::Table)
                    .col(DealDocuments::DealId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DealCommunications::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DealCommunications::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DealCommunications::DealId).uuid().not_null())
                    .col(ColumnDef::new(DealCommunications::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(DealCommunications::Channel)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DealCommunications::Direction)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(DealCommunications::Subject).string_len(512))
                    .col(ColumnDef::new(DealCommunications::Body).text())
                    .col(ColumnDef::new(DealCommunications::Counterparty).string_len(256))
                    .col(ColumnDef::new(DealCommunications::ThreadId).uuid())
                    .col(
                        ColumnDef::new(DealCommunications::OccurredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DealCommunications::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_communications_deal")
                            .from(DealCommunications::Table, DealCommunications::DealId)
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
                    .name("idx_deal_communications_thread")
                    .table(DealCommunications::Table)
                    .col(DealCommunications::DealId)
                    .col(DealCommunications::ThreadId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Favorites::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Favorites::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(Favorites::ListingId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Favorites::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(Favorites::UserId)
                            .col(Favorites::ListingId),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in [
            Favorites::Table.into_iden(),
            DealCommunications::Table.into_iden(),
            DealDocuments::Table.into_iden(),
            DealTasks::Table.into_iden(),
        ] {
            manager
                .drop_table(Table::drop().table(table).if_exists().to_owned())
                .await?;
        }
        Ok(())
    }
}
