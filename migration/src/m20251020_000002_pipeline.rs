use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum PipelineCategory {
    Table,
    Id,
    Kind,
    Name,
    Description,
    Stages,
    CreatedAt,
    CreatedBy,
    UpdatedAt,
    UpdatedBy,
    Revision,
    IsActive,
}

#[derive(DeriveIden)]
enum PipelineItem {
    Table,
    Id,
    Kind,
    CategoryId,
    StageId,
    SortOrder,
    Title,
    Value,
    Details,
    ResponsibleUserId,
    CreatedAt,
    CreatedBy,
    UpdatedAt,
    UpdatedBy,
    Revision,
    IsActive,
    ClosedAt,
}

#[derive(DeriveIden)]
enum PipelineRevision {
    Table,
    Id,
    Kind,
    Collection,
    RevisionOf,
    RevisionNumber,
    Action,
    Snapshot,
    RecordedAt,
    RecordedBy,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PipelineCategory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PipelineCategory::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PipelineCategory::Kind)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PipelineCategory::Name)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PipelineCategory::Description).text().null())
                    .col(ColumnDef::new(PipelineCategory::Stages).json().not_null())
                    .col(
                        ColumnDef::new(PipelineCategory::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PipelineCategory::CreatedBy).uuid().null())
                    .col(
                        ColumnDef::new(PipelineCategory::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(PipelineCategory::UpdatedBy).uuid().null())
                    .col(
                        ColumnDef::new(PipelineCategory::Revision)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(PipelineCategory::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pipeline_category_kind")
                    .table(PipelineCategory::Table)
                    .col(PipelineCategory::Kind)
                    .col(PipelineCategory::IsActive)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PipelineItem::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PipelineItem::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PipelineItem::Kind).string_len(16).not_null())
                    .col(ColumnDef::new(PipelineItem::CategoryId).uuid().not_null())
                    .col(ColumnDef::new(PipelineItem::StageId).uuid().not_null())
                    .col(
                        ColumnDef::new(PipelineItem::SortOrder)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(PipelineItem::Title).string_len(512).not_null())
                    .col(ColumnDef::new(PipelineItem::Value).double().null())
                    .col(ColumnDef::new(PipelineItem::Details).json().not_null())
                    .col(
                        ColumnDef::new(PipelineItem::ResponsibleUserId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PipelineItem::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PipelineItem::CreatedBy).uuid().null())
                    .col(
                        ColumnDef::new(PipelineItem::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(PipelineItem::UpdatedBy).uuid().null())
                    .col(
                        ColumnDef::new(PipelineItem::Revision)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(PipelineItem::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(PipelineItem::ClosedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pipeline_item_category")
                            .from(PipelineItem::Table, PipelineItem::CategoryId)
                            .to(PipelineCategory::Table, PipelineCategory::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pipeline_item_stage_order")
                    .table(PipelineItem::Table)
                    .col(PipelineItem::StageId)
                    .col(PipelineItem::IsActive)
                    .col(PipelineItem::SortOrder)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pipeline_item_category")
                    .table(PipelineItem::Table)
                    .col(PipelineItem::CategoryId)
                    .col(PipelineItem::IsActive)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pipeline_item_responsible")
                    .table(PipelineItem::Table)
                    .col(PipelineItem::ResponsibleUserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PipelineRevision::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PipelineRevision::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PipelineRevision::Kind)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PipelineRevision::Collection)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PipelineRevision::RevisionOf).uuid().not_null())
                    .col(
                        ColumnDef::new(PipelineRevision::RevisionNumber)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PipelineRevision::Action)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PipelineRevision::Snapshot).json().not_null())
                    .col(
                        ColumnDef::new(PipelineRevision::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PipelineRevision::RecordedBy).uuid().null())
                    .to_owned(),
            )
            .await?;

        // A second writer racing on the same parent revision fails here.
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_pipeline_revision_number")
                    .table(PipelineRevision::Table)
                    .col(PipelineRevision::Collection)
                    .col(PipelineRevision::RevisionOf)
                    .col(PipelineRevision::RevisionNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PipelineRevision::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PipelineItem::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PipelineCategory::Table).to_owned())
            .await
    }
}
