use sea_orm::entity::prelude::*;

use crate::PipelineKind;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "pipeline_item")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub kind: PipelineKind,
    #[sea_orm(indexed)]
    pub category_id: Uuid,
    #[sea_orm(indexed)]
    pub stage_id: Uuid,
    #[sea_orm(column_name = "sort_order")]
    pub order: i32,
    pub title: String,
    pub value: Option<f64>,
    pub details: Json,
    #[sea_orm(indexed)]
    pub responsible_user_id: Uuid,
    pub created_at: DateTimeWithTimeZone,
    pub created_by: Option<Uuid>,
    pub updated_at: Option<DateTimeWithTimeZone>,
    pub updated_by: Option<Uuid>,
    pub revision: i32,
    pub is_active: bool,
    pub closed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::pipeline_category::Entity",
        from = "Column::CategoryId",
        to = "super::pipeline_category::Column::Id"
    )]
    Category,
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::ResponsibleUserId",
        to = "super::users::Column::Id"
    )]
    ResponsibleUser,
}

impl Related<super::pipeline_category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Category.def()
    }
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ResponsibleUser.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
