use std::collections::HashSet;
use std::sync::Arc;

use entity::PipelineKind;
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::categories::{Category, CategoryPatch, CategoryRepository, NewCategory, StageDraft};
use crate::error::{PipelineError, PipelineResult, storage};
use crate::fields::{BuyerFields, DealFields, PipelineFields};
use crate::items::{ItemQuery, ItemRepository, ItemUpdate, MoveRequest, NewItem, PipelineItem};
use crate::settings::{PipelineSettings, StageDeletePolicy};
use crate::store::RevisionRecord;
use crate::users::UserDirectory;

pub type DealsManager = PipelineManager<DealFields>;
pub type BuyersManager = PipelineManager<BuyerFields>;

/// Validates requests against categories, stages and users, then hands them
/// to the repositories.
pub struct PipelineManager<F> {
    db: Arc<DatabaseConnection>,
    categories: CategoryRepository,
    items: ItemRepository<F>,
    users: Arc<dyn UserDirectory>,
    settings: PipelineSettings,
}

impl<F: PipelineFields> PipelineManager<F> {
    pub fn new(
        db: Arc<DatabaseConnection>,
        users: Arc<dyn UserDirectory>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            categories: CategoryRepository::new(db.clone(), F::KIND),
            items: ItemRepository::new(db.clone()),
            db,
            users,
            settings,
        }
    }

    pub fn kind(&self) -> PipelineKind {
        F::KIND
    }

    pub fn categories(&self) -> &CategoryRepository {
        &self.categories
    }

    pub fn items(&self) -> &ItemRepository<F> {
        &self.items
    }

    async fn require_user(&self, user_id: Uuid) -> PipelineResult<()> {
        match self.users.get_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(PipelineError::NoSuchUser(user_id)),
        }
    }

    /// The item, provided the category it belongs to is still readable.
    async fn owned_item(&self, id: Uuid) -> PipelineResult<(Category, PipelineItem<F>)> {
        let item = self.items.get(id).await?;
        let category = self.categories.get(item.category_id).await?;
        Ok((category, item))
    }

    #[instrument(name = "pipeline.create_category", skip_all, fields(kind = %F::KIND))]
    pub async fn create_category(
        &self,
        new: NewCategory,
        actor: Option<Uuid>,
    ) -> PipelineResult<Category> {
        if new.stages.is_empty() {
            return Err(PipelineError::InvalidStage(
                "a category needs at least one stage".into(),
            ));
        }
        let category = self.categories.add(new, actor).await?;
        info!(category_id = %category.id, "category created");
        Ok(category)
    }

    pub async fn get_category(&self, id: Uuid) -> PipelineResult<Category> {
        self.categories.get(id).await
    }

    pub async fn list_categories(&self, active_only: bool) -> PipelineResult<Vec<Category>> {
        self.categories.list(active_only).await
    }

    #[instrument(name = "pipeline.update_category", skip_all, fields(kind = %F::KIND, category_id = %id))]
    pub async fn update_category(
        &self,
        id: Uuid,
        patch: CategoryPatch,
        actor: Option<Uuid>,
    ) -> PipelineResult<Category> {
        let current = self.categories.get(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }
        self.categories.update(id, patch, actor).await
    }

    /// Rewrite the stage list. Stages left out of `stages` go away, and the
    /// configured [`StageDeletePolicy`] decides what happens to their items.
    #[instrument(name = "pipeline.update_category_stages", skip_all, fields(kind = %F::KIND, category_id = %id))]
    pub async fn update_category_stages(
        &self,
        id: Uuid,
        stages: Vec<StageDraft>,
        actor: Option<Uuid>,
    ) -> PipelineResult<Category> {
        if stages.is_empty() {
            return Err(PipelineError::InvalidStage("stage list cannot be empty".into()));
        }
        crate::categories::check_stage_orders(&stages)?;

        let txn = self.db.begin().await.map_err(storage("begin", id))?;
        self.categories.lock_in(&txn, id).await?;
        let current = self.categories.get_in(&txn, id).await?;
        let kept: HashSet<Uuid> = stages.iter().filter_map(|stage| stage.id).collect();
        let dropped: Vec<Uuid> = current
            .stages
            .iter()
            .map(|stage| stage.id)
            .filter(|stage_id| !kept.contains(stage_id))
            .collect();
        for stage_id in &dropped {
            self.release_stage(
                &txn,
                &current,
                *stage_id,
                &dropped,
                self.settings.stage_delete_policy,
                actor,
            )
            .await?;
        }
        let updated = self
            .categories
            .update_stages_in(&txn, id, stages, actor)
            .await?;
        txn.commit().await.map_err(storage("commit", id))?;
        Ok(updated)
    }

    #[instrument(name = "pipeline.delete_category", skip_all, fields(kind = %F::KIND, category_id = %id))]
    pub async fn delete_category(&self, id: Uuid, actor: Option<Uuid>) -> PipelineResult<Category> {
        self.categories.get(id).await?;
        self.categories.soft_delete(id, actor).await
    }

    /// Soft-delete a stage. `policy` overrides the configured
    /// [`StageDeletePolicy`] for this call.
    #[instrument(
        name = "pipeline.delete_stage",
        skip_all,
        fields(kind = %F::KIND, category_id = %category_id, stage_id = %stage_id)
    )]
    pub async fn delete_stage(
        &self,
        category_id: Uuid,
        stage_id: Uuid,
        policy: Option<StageDeletePolicy>,
        actor: Option<Uuid>,
    ) -> PipelineResult<Category> {
        let policy = policy.unwrap_or(self.settings.stage_delete_policy);

        let txn = self
            .db
            .begin()
            .await
            .map_err(storage("begin", category_id))?;
        self.categories.lock_in(&txn, category_id).await?;
        let category = self.categories.get_in(&txn, category_id).await?;
        category.active_stage(stage_id)?;
        self.release_stage(&txn, &category, stage_id, &[stage_id], policy, actor)
            .await?;
        let updated = self
            .categories
            .soft_delete_stage_in(&txn, category_id, stage_id, actor)
            .await?;
        txn.commit().await.map_err(storage("commit", category_id))?;
        Ok(updated)
    }

    /// Apply `policy` to the active items of a stage that is going away.
    /// `leaving` lists every stage removed by the same write; none of them
    /// can take the items. The caller holds the category lock.
    async fn release_stage<C: ConnectionTrait>(
        &self,
        conn: &C,
        category: &Category,
        stage_id: Uuid,
        leaving: &[Uuid],
        policy: StageDeletePolicy,
        actor: Option<Uuid>,
    ) -> PipelineResult<()> {
        let remaining = ItemRepository::<F>::count_in_stage_in(conn, stage_id, None).await?;
        if remaining == 0 {
            return Ok(());
        }
        match policy {
            StageDeletePolicy::Block => Err(PipelineError::StageInUse {
                stage_id,
                count: remaining,
            }),
            StageDeletePolicy::ReassignTo(target) => {
                if leaving.contains(&target) {
                    return Err(PipelineError::InvalidStage(format!(
                        "cannot reassign items to stage {target}, it is being removed"
                    )));
                }
                category.active_stage(target)?;
                let moved = self
                    .items
                    .evacuate_stage_in(conn, stage_id, target, actor)
                    .await?;
                info!(moved, %stage_id, to_stage = %target, "stage items reassigned");
                Ok(())
            }
            StageDeletePolicy::AllowDangling => {
                warn!(remaining, %stage_id, "removing stage that still holds active items");
                Ok(())
            }
        }
    }

    #[instrument(
        name = "pipeline.create_item",
        skip_all,
        fields(kind = %F::KIND, category_id = %new.category_id, stage_id = %new.stage_id)
    )]
    pub async fn create_item(
        &self,
        new: NewItem<F>,
        actor: Option<Uuid>,
    ) -> PipelineResult<PipelineItem<F>> {
        let category = self.categories.get(new.category_id).await?;
        category.active_stage(new.stage_id)?;
        self.require_user(new.responsible_user_id).await?;
        if let Some(order) = new.order {
            if order < 0 {
                return Err(PipelineError::InvalidOrder(order));
            }
        }
        let item = self.items.add(new, actor).await?;
        info!(item_id = %item.id, order = item.order, "item created");
        Ok(item)
    }

    pub async fn get_item(&self, id: Uuid) -> PipelineResult<PipelineItem<F>> {
        self.owned_item(id).await.map(|(_, item)| item)
    }

    pub async fn list_by_category(
        &self,
        category_id: Uuid,
        query: &ItemQuery,
    ) -> PipelineResult<Vec<PipelineItem<F>>> {
        self.categories.get(category_id).await?;
        self.items.list_by_category(category_id, query).await
    }

    pub async fn list_by_responsible_user(
        &self,
        user_id: Uuid,
        active_only: bool,
    ) -> PipelineResult<Vec<PipelineItem<F>>> {
        self.require_user(user_id).await?;
        self.items.list_by_responsible_user(user_id, active_only).await
    }

    pub async fn count_by_category(&self, category_id: Uuid, active_only: bool) -> PipelineResult<u64> {
        self.categories.get(category_id).await?;
        self.items.count_by_category(category_id, active_only).await
    }

    pub async fn sum_value_by_category(
        &self,
        category_id: Uuid,
        active_only: bool,
    ) -> PipelineResult<f64> {
        self.categories.get(category_id).await?;
        self.items.sum_value_by_category(category_id, active_only).await
    }

    #[instrument(name = "pipeline.update_item", skip_all, fields(kind = %F::KIND, item_id = %id))]
    pub async fn update_item(
        &self,
        id: Uuid,
        update: ItemUpdate<F>,
        actor: Option<Uuid>,
    ) -> PipelineResult<PipelineItem<F>> {
        let (_, current) = self.owned_item(id).await?;
        if update.is_empty() {
            return Ok(current);
        }
        if let Some(user_id) = update.responsible_user_id {
            self.require_user(user_id).await?;
        }
        self.items.update(id, update, actor).await
    }

    #[instrument(name = "pipeline.delete_item", skip_all, fields(kind = %F::KIND, item_id = %id))]
    pub async fn delete_item(&self, id: Uuid, actor: Option<Uuid>) -> PipelineResult<PipelineItem<F>> {
        self.owned_item(id).await?;
        self.items.soft_delete(id, actor).await
    }

    #[instrument(name = "pipeline.close_item", skip_all, fields(kind = %F::KIND, item_id = %id))]
    pub async fn close_item(&self, id: Uuid, actor: Option<Uuid>) -> PipelineResult<PipelineItem<F>> {
        self.owned_item(id).await?;
        self.items.close(id, actor).await
    }

    /// Move an item to `request.stage_id` of its own category and return the
    /// stored result.
    #[instrument(
        name = "pipeline.move_item",
        skip_all,
        fields(kind = %F::KIND, item_id = %id, stage_id = %request.stage_id)
    )]
    pub async fn move_item(
        &self,
        id: Uuid,
        request: MoveRequest,
        actor: Option<Uuid>,
    ) -> PipelineResult<PipelineItem<F>> {
        let (category, _) = self.owned_item(id).await?;
        category.active_stage(request.stage_id)?;
        if let Some(order) = request.order {
            if order < 0 {
                return Err(PipelineError::InvalidOrder(order));
            }
        }
        self.items.move_to_stage(id, request, actor).await?;
        self.items.get(id).await
    }

    pub async fn item_history(&self, id: Uuid) -> PipelineResult<Vec<RevisionRecord>> {
        self.owned_item(id).await?;
        self.items.history(id).await
    }

    pub async fn category_history(&self, id: Uuid) -> PipelineResult<Vec<RevisionRecord>> {
        self.categories.get(id).await?;
        self.categories.history(id).await
    }
}
