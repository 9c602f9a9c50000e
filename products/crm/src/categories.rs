use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use entity::{PipelineKind, RevisionAction, RevisionCollection, pipeline_category};
use sea_orm::entity::prelude::*;
use sea_orm::{ConnectionTrait, DatabaseConnection, QueryOrder, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{PipelineError, PipelineResult, storage};
use crate::store::{self, RevisionEntry, RevisionRecord};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: Uuid,
    pub name: String,
    pub order: i32,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default = "stage_active_default")]
    pub is_active: bool,
    pub created_at: DateTimeWithTimeZone,
    #[serde(default)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

fn stage_active_default() -> bool {
    true
}

/// Caller-supplied stage. Supplying `id` keeps the identity (and creation
/// time) of an existing stage across a stage-list rewrite; the id must name a
/// stage the category already has.
#[derive(Clone, Debug, Default)]
pub struct StageDraft {
    pub id: Option<Uuid>,
    pub name: String,
    pub order: i32,
    pub color: Option<String>,
}

impl StageDraft {
    pub fn new(name: impl Into<String>, order: i32) -> Self {
        Self {
            id: None,
            name: name.into(),
            order,
            color: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

impl From<&Stage> for StageDraft {
    fn from(stage: &Stage) -> Self {
        Self {
            id: Some(stage.id),
            name: stage.name.clone(),
            order: stage.order,
            color: stage.color.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub kind: PipelineKind,
    pub name: String,
    pub description: Option<String>,
    pub stages: Vec<Stage>,
    pub created_at: DateTimeWithTimeZone,
    pub created_by: Option<Uuid>,
    pub updated_at: Option<DateTimeWithTimeZone>,
    pub updated_by: Option<Uuid>,
    pub revision: i32,
    pub is_active: bool,
}

impl Category {
    pub fn stage(&self, stage_id: Uuid) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.id == stage_id)
    }

    /// Stages sorted by their display order.
    pub fn ordered_stages(&self) -> Vec<&Stage> {
        let mut stages: Vec<&Stage> = self.stages.iter().collect();
        stages.sort_by_key(|stage| stage.order);
        stages
    }

    /// The stage if it exists and has not been soft-deleted.
    pub fn active_stage(&self, stage_id: Uuid) -> PipelineResult<&Stage> {
        match self.stage(stage_id) {
            Some(stage) if stage.is_active => Ok(stage),
            Some(_) => Err(PipelineError::InvalidStage(format!(
                "stage {stage_id} of category {} is deleted",
                self.id
            ))),
            None => Err(PipelineError::InvalidStage(format!(
                "stage {stage_id} does not belong to category {}",
                self.id
            ))),
        }
    }

    fn from_model(model: pipeline_category::Model) -> PipelineResult<Self> {
        let stages = store::decode(model.stages, model.id)?;
        Ok(Self {
            id: model.id,
            kind: model.kind,
            name: model.name,
            description: model.description,
            stages,
            created_at: model.created_at,
            created_by: model.created_by,
            updated_at: model.updated_at,
            updated_by: model.updated_by,
            revision: model.revision,
            is_active: model.is_active,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct NewCategory {
    pub name: String,
    pub description: Option<String>,
    pub stages: Vec<StageDraft>,
}

#[derive(Clone, Debug, Default)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

impl CategoryPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.is_active.is_none()
    }
}

/// Reject stage lists where two stages share an `order`.
pub fn check_stage_orders(stages: &[StageDraft]) -> PipelineResult<()> {
    let mut seen = HashSet::new();
    for stage in stages {
        if !seen.insert(stage.order) {
            return Err(PipelineError::InvalidStage(format!(
                "duplicate stage order {}",
                stage.order
            )));
        }
    }
    Ok(())
}

/// Materialise drafts into stages, keeping creation time and activity of the
/// stages in `existing` whose ids are supplied again. Ids that are unknown to
/// `existing` or supplied twice are rejected.
fn build_stages(
    drafts: Vec<StageDraft>,
    existing: &[Stage],
    now: DateTimeWithTimeZone,
) -> PipelineResult<Vec<Stage>> {
    let mut claimed = HashSet::new();
    drafts
        .into_iter()
        .map(|draft| {
            let Some(id) = draft.id else {
                return Ok(Stage {
                    id: Uuid::new_v4(),
                    name: draft.name,
                    order: draft.order,
                    color: draft.color,
                    is_active: true,
                    created_at: now,
                    updated_at: None,
                });
            };
            if !claimed.insert(id) {
                return Err(PipelineError::InvalidStage(format!("stage {id} listed twice")));
            }
            let previous = existing
                .iter()
                .find(|stage| stage.id == id)
                .ok_or_else(|| PipelineError::InvalidStage(format!("unknown stage {id}")))?;
            Ok(Stage {
                id,
                name: draft.name,
                order: draft.order,
                color: draft.color,
                is_active: previous.is_active,
                created_at: previous.created_at,
                updated_at: Some(now),
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct CategoryRepository {
    db: Arc<DatabaseConnection>,
    kind: PipelineKind,
}

impl CategoryRepository {
    pub fn new(db: Arc<DatabaseConnection>, kind: PipelineKind) -> Self {
        Self { db, kind }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    #[instrument(name = "category.add", skip_all, fields(kind = %self.kind))]
    pub async fn add(&self, new: NewCategory, actor: Option<Uuid>) -> PipelineResult<Category> {
        check_stage_orders(&new.stages)?;
        let id = Uuid::new_v4();

        let now: DateTimeWithTimeZone = Utc::now().into();
        let stages = build_stages(new.stages, &[], now)?;
        let category = Category {
            id,
            kind: self.kind,
            name: new.name,
            description: new.description,
            stages,
            created_at: now,
            created_by: actor,
            updated_at: None,
            updated_by: None,
            revision: 1,
            is_active: true,
        };

        let txn = self.db.begin().await.map_err(storage("begin", id))?;
        let model = pipeline_category::ActiveModel {
            id: Set(id),
            kind: Set(self.kind),
            name: Set(category.name.clone()),
            description: Set(category.description.clone()),
            stages: Set(store::snapshot(&category.stages, id)?),
            created_at: Set(now),
            created_by: Set(actor),
            updated_at: Set(None),
            updated_by: Set(None),
            revision: Set(1),
            is_active: Set(true),
        };
        pipeline_category::Entity::insert(model)
            .exec_without_returning(&txn)
            .await
            .map_err(storage("add_category", id))?;
        store::append_revision(
            &txn,
            RevisionEntry {
                kind: self.kind,
                collection: RevisionCollection::Category,
                revision_of: id,
                revision_number: 1,
                action: RevisionAction::Create,
                snapshot: store::snapshot(&category, id)?,
                recorded_by: actor,
            },
        )
        .await?;
        let created = self.get_in(&txn, id).await?;
        txn.commit().await.map_err(storage("commit", id))?;
        debug!(category_id = %id, stages = created.stages.len(), "category created");
        Ok(created)
    }

    pub async fn find(&self, id: Uuid) -> PipelineResult<Option<Category>> {
        self.find_in(self.db.as_ref(), id).await
    }

    pub async fn get(&self, id: Uuid) -> PipelineResult<Category> {
        self.get_in(self.db.as_ref(), id).await
    }

    pub async fn get_in<C: ConnectionTrait>(&self, conn: &C, id: Uuid) -> PipelineResult<Category> {
        self.find_in(conn, id)
            .await?
            .ok_or(PipelineError::NoSuchCategory {
                kind: self.kind,
                id,
            })
    }

    async fn find_in<C: ConnectionTrait>(&self, conn: &C, id: Uuid) -> PipelineResult<Option<Category>> {
        let model = pipeline_category::Entity::find_by_id(id)
            .filter(pipeline_category::Column::Kind.eq(self.kind))
            .one(conn)
            .await
            .map_err(storage("get_category", id))?;
        model.map(Category::from_model).transpose()
    }

    pub async fn list(&self, active_only: bool) -> PipelineResult<Vec<Category>> {
        let mut query = pipeline_category::Entity::find()
            .filter(pipeline_category::Column::Kind.eq(self.kind));
        if active_only {
            query = query.filter(pipeline_category::Column::IsActive.eq(true));
        }
        let models = query
            .order_by_asc(pipeline_category::Column::CreatedAt)
            .order_by_asc(pipeline_category::Column::Name)
            .all(self.db.as_ref())
            .await
            .map_err(storage("list_categories", self.kind))?;
        models.into_iter().map(Category::from_model).collect()
    }

    pub async fn update(
        &self,
        id: Uuid,
        patch: CategoryPatch,
        actor: Option<Uuid>,
    ) -> PipelineResult<Category> {
        let txn = self.db.begin().await.map_err(storage("begin", id))?;
        let current = self.get_in(&txn, id).await?;
        let mut changes = pipeline_category::ActiveModel {
            ..Default::default()
        };
        if let Some(name) = patch.name {
            changes.name = Set(name);
        }
        if let Some(description) = patch.description {
            changes.description = Set(Some(description));
        }
        if let Some(is_active) = patch.is_active {
            changes.is_active = Set(is_active);
        }
        self.swap(&txn, &current, changes, RevisionAction::Update, actor)
            .await?;
        let updated = self.get_in(&txn, id).await?;
        txn.commit().await.map_err(storage("commit", id))?;
        Ok(updated)
    }

    pub async fn update_stages(
        &self,
        id: Uuid,
        stages: Vec<StageDraft>,
        actor: Option<Uuid>,
    ) -> PipelineResult<Category> {
        let txn = self.db.begin().await.map_err(storage("begin", id))?;
        self.lock_in(&txn, id).await?;
        let updated = self.update_stages_in(&txn, id, stages, actor).await?;
        txn.commit().await.map_err(storage("commit", id))?;
        Ok(updated)
    }

    /// Rewrite the stage list inside the caller's transaction. Items of
    /// stages left out of `stages` are not touched.
    pub async fn update_stages_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
        stages: Vec<StageDraft>,
        actor: Option<Uuid>,
    ) -> PipelineResult<Category> {
        check_stage_orders(&stages)?;
        let current = self.get_in(conn, id).await?;
        let now: DateTimeWithTimeZone = Utc::now().into();
        let rebuilt = build_stages(stages, &current.stages, now)?;
        let changes = pipeline_category::ActiveModel {
            stages: Set(store::snapshot(&rebuilt, id)?),
            ..Default::default()
        };
        self.swap(conn, &current, changes, RevisionAction::Stages, actor)
            .await?;
        self.get_in(conn, id).await
    }

    /// Lock the category row until the transaction ends.
    pub async fn lock_in<C: ConnectionTrait>(&self, conn: &C, id: Uuid) -> PipelineResult<()> {
        store::lock_category(conn, self.kind, id).await
    }

    pub async fn soft_delete(&self, id: Uuid, actor: Option<Uuid>) -> PipelineResult<Category> {
        self.update(
            id,
            CategoryPatch {
                is_active: Some(false),
                ..CategoryPatch::default()
            },
            actor,
        )
        .await
    }

    pub async fn soft_delete_stage(
        &self,
        id: Uuid,
        stage_id: Uuid,
        actor: Option<Uuid>,
    ) -> PipelineResult<Category> {
        let txn = self.db.begin().await.map_err(storage("begin", id))?;
        self.lock_in(&txn, id).await?;
        let updated = self.soft_delete_stage_in(&txn, id, stage_id, actor).await?;
        txn.commit().await.map_err(storage("commit", id))?;
        Ok(updated)
    }

    pub async fn soft_delete_stage_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
        stage_id: Uuid,
        actor: Option<Uuid>,
    ) -> PipelineResult<Category> {
        let current = self.get_in(conn, id).await?;
        current.active_stage(stage_id)?;

        let now: DateTimeWithTimeZone = Utc::now().into();
        let mut stages = current.stages.clone();
        for stage in stages.iter_mut().filter(|stage| stage.id == stage_id) {
            stage.is_active = false;
            stage.updated_at = Some(now);
        }
        let changes = pipeline_category::ActiveModel {
            stages: Set(store::snapshot(&stages, id)?),
            ..Default::default()
        };
        self.swap(conn, &current, changes, RevisionAction::Stages, actor)
            .await?;
        self.get_in(conn, id).await
    }

    pub async fn history(&self, id: Uuid) -> PipelineResult<Vec<RevisionRecord>> {
        store::list_revisions(self.db.as_ref(), self.kind, RevisionCollection::Category, id).await
    }

    /// Write `changes` guarded on the revision of `current` and record its
    /// pre-image.
    async fn swap<C: ConnectionTrait>(
        &self,
        conn: &C,
        current: &Category,
        mut changes: pipeline_category::ActiveModel,
        action: RevisionAction,
        actor: Option<Uuid>,
    ) -> PipelineResult<()> {
        let next = current.revision + 1;
        changes.revision = Set(next);
        changes.updated_at = Set(Some(Utc::now().into()));
        changes.updated_by = Set(actor);

        let target = format!("{} category {}", self.kind, current.id);
        let result = pipeline_category::Entity::update_many()
            .set(changes)
            .filter(pipeline_category::Column::Id.eq(current.id))
            .filter(pipeline_category::Column::Revision.eq(current.revision))
            .exec(conn)
            .await
            .map_err(storage("update_category", &target))?;
        store::expect_swapped(result.rows_affected, &target)?;

        store::append_revision(
            conn,
            RevisionEntry {
                kind: self.kind,
                collection: RevisionCollection::Category,
                revision_of: current.id,
                revision_number: next,
                action,
                snapshot: store::snapshot(current, current.id)?,
                recorded_by: actor,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_orders_are_rejected() {
        let stages = vec![StageDraft::new("New", 0), StageDraft::new("Won", 0)];
        assert!(matches!(
            check_stage_orders(&stages),
            Err(PipelineError::InvalidStage(_))
        ));
        assert!(check_stage_orders(&[StageDraft::new("New", 0), StageDraft::new("Won", 1)]).is_ok());
    }

    #[test]
    fn rebuild_keeps_identity_of_known_stages() {
        let created: DateTimeWithTimeZone = Utc::now().into();
        let existing = build_stages(vec![StageDraft::new("New", 0)], &[], created).unwrap();
        let kept = existing[0].id;

        let later: DateTimeWithTimeZone = Utc::now().into();
        let rebuilt = build_stages(
            vec![
                StageDraft::new("Fresh", 0).with_id(kept),
                StageDraft::new("Won", 1).with_color("#0a0"),
            ],
            &existing,
            later,
        )
        .unwrap();
        assert_eq!(rebuilt[0].id, kept);
        assert_eq!(rebuilt[0].name, "Fresh");
        assert_eq!(rebuilt[0].created_at, created);
        assert_eq!(rebuilt[0].updated_at, Some(later));
        assert_ne!(rebuilt[1].id, kept);
        assert!(rebuilt[1].is_active);
        assert_eq!(rebuilt[1].color.as_deref(), Some("#0a0"));
    }

    #[test]
    fn rebuild_rejects_foreign_and_repeated_ids() {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let existing = build_stages(vec![StageDraft::new("New", 0)], &[], now).unwrap();
        let known = existing[0].id;

        let foreign = build_stages(
            vec![StageDraft::new("Borrowed", 0).with_id(Uuid::new_v4())],
            &existing,
            now,
        );
        assert!(matches!(foreign, Err(PipelineError::InvalidStage(_))));

        let repeated = build_stages(
            vec![
                StageDraft::new("New", 0).with_id(known),
                StageDraft::new("Again", 1).with_id(known),
            ],
            &existing,
            now,
        );
        assert!(matches!(repeated, Err(PipelineError::InvalidStage(_))));

        let on_create = build_stages(vec![StageDraft::new("New", 0).with_id(known)], &[], now);
        assert!(matches!(on_create, Err(PipelineError::InvalidStage(_))));
    }
}
