#![allow(dead_code)]

use std::sync::Arc;

use migration::{Migrator, MigratorTrait};
use platform_authz::Role;
use products_crm::{
    Category, DbUserDirectory, ItemQuery, NewCategory, NewItem, PipelineFields, PipelineItem,
    PipelineManager, PipelineSettings, StageDraft, UserRecord,
};
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

pub struct TestContext {
    pub db: Arc<DatabaseConnection>,
    pub users: Arc<DbUserDirectory>,
    pub owner: UserRecord,
}

impl TestContext {
    pub async fn new() -> Self {
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&conn, None).await.unwrap();
        let db = Arc::new(conn);
        let users = Arc::new(DbUserDirectory::new(db.clone()));
        let owner = users
            .register("owner@example.com", Some("Pipeline Owner"), &[Role::SalesExecutor])
            .await
            .unwrap();
        Self { db, users, owner }
    }

    pub fn manager<F: PipelineFields>(&self) -> PipelineManager<F> {
        self.manager_with(PipelineSettings::default())
    }

    pub fn manager_with<F: PipelineFields>(&self, settings: PipelineSettings) -> PipelineManager<F> {
        PipelineManager::new(self.db.clone(), self.users.clone(), settings)
    }

    pub fn actor(&self) -> Option<Uuid> {
        Some(self.owner.id)
    }
}

/// A category whose stages are `names`, ordered as given.
pub async fn funnel<F: PipelineFields>(
    manager: &PipelineManager<F>,
    name: &str,
    names: &[&str],
) -> Category {
    let stages = names
        .iter()
        .zip(0..)
        .map(|(stage, order)| StageDraft::new(*stage, order))
        .collect();
    manager
        .create_category(
            NewCategory {
                name: name.to_string(),
                description: None,
                stages,
            },
            None,
        )
        .await
        .unwrap()
}

pub fn stage(category: &Category, name: &str) -> Uuid {
    category
        .stages
        .iter()
        .find(|stage| stage.name == name)
        .map(|stage| stage.id)
        .unwrap()
}

pub async fn add_item<F: PipelineFields>(
    ctx: &TestContext,
    manager: &PipelineManager<F>,
    category: &Category,
    stage_id: Uuid,
    fields: F,
) -> PipelineItem<F> {
    manager
        .create_item(
            NewItem {
                category_id: category.id,
                stage_id,
                order: None,
                responsible_user_id: ctx.owner.id,
                fields,
            },
            ctx.actor(),
        )
        .await
        .unwrap()
}

/// Titles of the active items of a stage, in stage order.
pub async fn board<F: PipelineFields>(
    manager: &PipelineManager<F>,
    category: &Category,
    stage_id: Uuid,
) -> Vec<(String, i32)> {
    manager
        .list_by_category(category.id, &ItemQuery::in_stage(stage_id))
        .await
        .unwrap()
        .into_iter()
        .map(|item| (item.fields.title().to_string(), item.order))
        .collect()
}

pub fn titles(board: &[(String, i32)]) -> Vec<&str> {
    board.iter().map(|(title, _)| title.as_str()).collect()
}

pub fn assert_dense(board: &[(String, i32)]) {
    let orders: Vec<i32> = board.iter().map(|(_, order)| *order).collect();
    let expected: Vec<i32> = (0..).take(orders.len()).collect();
    assert_eq!(orders, expected, "stage orders are not dense: {board:?}");
}
