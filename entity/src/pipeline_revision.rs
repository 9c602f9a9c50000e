use sea_orm::entity::prelude::*;

use crate::{PipelineKind, RevisionAction, RevisionCollection};

/// Append-only audit record. `snapshot` holds the parent as it was before the
/// write that produced `revision_number`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "pipeline_revision")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub kind: PipelineKind,
    pub collection: RevisionCollection,
    #[sea_orm(indexed)]
    pub revision_of: Uuid,
    pub revision_number: i32,
    pub action: RevisionAction,
    pub snapshot: Json,
    pub recorded_at: DateTimeWithTimeZone,
    pub recorded_by: Option<Uuid>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
