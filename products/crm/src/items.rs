use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use entity::{PipelineKind, RevisionAction, RevisionCollection, pipeline_item};
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, FromQueryResult, PaginatorTrait, QueryOrder, QuerySelect, Select, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::error::{PipelineError, PipelineResult, storage};
use crate::fields::PipelineFields;
use crate::sequencer::{self, MovePlan, OrderShift, Slot};
use crate::store::{self, RevisionEntry, RevisionRecord};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineItem<F> {
    pub id: Uuid,
    pub kind: PipelineKind,
    pub category_id: Uuid,
    pub stage_id: Uuid,
    pub order: i32,
    pub responsible_user_id: Uuid,
    #[serde(flatten)]
    pub fields: F,
    pub created_at: DateTimeWithTimeZone,
    pub created_by: Option<Uuid>,
    pub updated_at: Option<DateTimeWithTimeZone>,
    pub updated_by: Option<Uuid>,
    pub revision: i32,
    pub is_active: bool,
    pub closed_at: Option<DateTimeWithTimeZone>,
}

impl<F: PipelineFields> PipelineItem<F> {
    pub fn slot(&self) -> Slot {
        Slot::new(self.stage_id, self.order)
    }

    fn from_model(model: pipeline_item::Model) -> PipelineResult<Self> {
        let fields = store::decode(model.details, model.id)?;
        Ok(Self {
            id: model.id,
            kind: model.kind,
            category_id: model.category_id,
            stage_id: model.stage_id,
            order: model.order,
            responsible_user_id: model.responsible_user_id,
            fields,
            created_at: model.created_at,
            created_by: model.created_by,
            updated_at: model.updated_at,
            updated_by: model.updated_by,
            revision: model.revision,
            is_active: model.is_active,
            closed_at: model.closed_at,
        })
    }
}

#[derive(Clone, Debug)]
pub struct NewItem<F> {
    pub category_id: Uuid,
    pub stage_id: Uuid,
    /// Explicit position; `None` appends to the end of the stage.
    pub order: Option<i32>,
    pub responsible_user_id: Uuid,
    pub fields: F,
}

#[derive(Clone, Debug)]
pub struct ItemUpdate<F: PipelineFields> {
    pub fields: F::Patch,
    pub responsible_user_id: Option<Uuid>,
}

impl<F: PipelineFields> Default for ItemUpdate<F> {
    fn default() -> Self {
        Self {
            fields: F::Patch::default(),
            responsible_user_id: None,
        }
    }
}

impl<F: PipelineFields> ItemUpdate<F> {
    pub fn fields(patch: F::Patch) -> Self {
        Self {
            fields: patch,
            responsible_user_id: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        F::is_empty_patch(&self.fields) && self.responsible_user_id.is_none()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    Order,
    CreatedAt,
    Value,
    Title,
}

impl SortField {
    /// Unknown names sort by stage order.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "created_at" => SortField::CreatedAt,
            "value" | "amount" | "potential_value" => SortField::Value,
            "title" | "name" => SortField::Title,
            _ => SortField::Order,
        }
    }

    fn column(self) -> pipeline_item::Column {
        match self {
            SortField::Order => pipeline_item::Column::Order,
            SortField::CreatedAt => pipeline_item::Column::CreatedAt,
            SortField::Value => pipeline_item::Column::Value,
            SortField::Title => pipeline_item::Column::Title,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SortField::Order => "order",
            SortField::CreatedAt => "created_at",
            SortField::Value => "value",
            SortField::Title => "title",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }

    fn order(self) -> sea_orm::Order {
        match self {
            SortDirection::Asc => sea_orm::Order::Asc,
            SortDirection::Desc => sea_orm::Order::Desc,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ItemQuery {
    pub active_only: bool,
    pub search: Option<String>,
    pub stage_id: Option<Uuid>,
    pub sort: SortField,
    pub direction: SortDirection,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            active_only: true,
            search: None,
            stage_id: None,
            sort: SortField::Order,
            direction: SortDirection::Asc,
        }
    }
}

impl ItemQuery {
    pub fn in_stage(stage_id: Uuid) -> Self {
        Self {
            stage_id: Some(stage_id),
            ..Self::default()
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MoveRequest {
    pub stage_id: Uuid,
    pub order: Option<i32>,
    /// Fail with a conflict unless the item is still at this revision.
    pub expected_revision: Option<i32>,
}

impl MoveRequest {
    pub fn to(stage_id: Uuid) -> Self {
        Self {
            stage_id,
            order: None,
            expected_revision: None,
        }
    }

    pub fn at(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn expecting(mut self, revision: i32) -> Self {
        self.expected_revision = Some(revision);
        self
    }
}

#[derive(Debug, FromQueryResult)]
struct ValueTotalRow {
    total: Option<f64>,
}

#[derive(Debug, FromQueryResult)]
struct MaxOrderRow {
    max_order: Option<i32>,
}

pub struct ItemRepository<F> {
    db: Arc<DatabaseConnection>,
    _fields: PhantomData<fn() -> F>,
}

impl<F> Clone for ItemRepository<F> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _fields: PhantomData,
        }
    }
}

impl<F: PipelineFields> ItemRepository<F> {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            _fields: PhantomData,
        }
    }

    fn target(id: Uuid) -> String {
        format!("{} {id}", F::KIND)
    }

    fn scoped() -> Select<pipeline_item::Entity> {
        pipeline_item::Entity::find().filter(pipeline_item::Column::Kind.eq(F::KIND))
    }

    #[instrument(name = "item.add", skip_all, fields(kind = %F::KIND, stage_id = %new.stage_id))]
    pub async fn add(&self, new: NewItem<F>, actor: Option<Uuid>) -> PipelineResult<PipelineItem<F>> {
        let id = Uuid::new_v4();
        let target = Self::target(id);
        let txn = self.db.begin().await.map_err(storage("begin", &target))?;
        store::lock_category(&txn, F::KIND, new.category_id).await?;

        let stages = [new.stage_id];
        let dense_before = Self::density(&txn, &stages).await?;
        let siblings = Self::count_in_stage_in(&txn, new.stage_id, None).await?;
        let max_order = Self::max_order_in(&txn, new.stage_id, None).await?;
        let order = sequencer::resolve_order(new.order, siblings, max_order)?;
        Self::apply_shift(&txn, &sequencer::open_slot(Slot::new(new.stage_id, order)), id).await?;

        let now: DateTimeWithTimeZone = Utc::now().into();
        let model = pipeline_item::ActiveModel {
            id: Set(id),
            kind: Set(F::KIND),
            category_id: Set(new.category_id),
            stage_id: Set(new.stage_id),
            order: Set(order),
            title: Set(new.fields.title().to_string()),
            value: Set(new.fields.value()),
            details: Set(store::snapshot(&new.fields, &target)?),
            responsible_user_id: Set(new.responsible_user_id),
            created_at: Set(now),
            created_by: Set(actor),
            updated_at: Set(None),
            updated_by: Set(None),
            revision: Set(1),
            is_active: Set(true),
            closed_at: Set(None),
        };
        pipeline_item::Entity::insert(model)
            .exec_without_returning(&txn)
            .await
            .map_err(storage("add_item", &target))?;
        Self::ensure_dense(&txn, &stages, &dense_before, &target).await?;

        let created = Self::get_in(&txn, id).await?;
        store::append_revision(
            &txn,
            RevisionEntry {
                kind: F::KIND,
                collection: RevisionCollection::Item,
                revision_of: id,
                revision_number: 1,
                action: RevisionAction::Create,
                snapshot: store::snapshot(&created, &target)?,
                recorded_by: actor,
            },
        )
        .await?;
        txn.commit().await.map_err(storage("commit", &target))?;
        debug!(item_id = %id, order, "item created");
        Ok(created)
    }

    pub async fn find(&self, id: Uuid) -> PipelineResult<Option<PipelineItem<F>>> {
        Self::find_in(self.db.as_ref(), id).await
    }

    pub async fn get(&self, id: Uuid) -> PipelineResult<PipelineItem<F>> {
        Self::get_in(self.db.as_ref(), id).await
    }

    async fn find_in<C: ConnectionTrait>(conn: &C, id: Uuid) -> PipelineResult<Option<PipelineItem<F>>> {
        let model = Self::scoped()
            .filter(pipeline_item::Column::Id.eq(id))
            .one(conn)
            .await
            .map_err(storage("get_item", Self::target(id)))?;
        model.map(PipelineItem::from_model).transpose()
    }

    async fn get_in<C: ConnectionTrait>(conn: &C, id: Uuid) -> PipelineResult<PipelineItem<F>> {
        Self::find_in(conn, id).await?.ok_or(PipelineError::NoSuchItem { kind: F::KIND, id })
    }

    /// Read the item again once its category is locked.
    async fn get_locked<C: ConnectionTrait>(conn: &C, id: Uuid) -> PipelineResult<PipelineItem<F>> {
        let category_id = Self::get_in(conn, id).await?.category_id;
        store::lock_category(conn, F::KIND, category_id).await?;
        Self::get_in(conn, id).await
    }

    pub async fn list_by_category(
        &self,
        category_id: Uuid,
        query: &ItemQuery,
    ) -> PipelineResult<Vec<PipelineItem<F>>> {
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty());
        let span = info_span!(
            "item.list_by_category",
            kind = %F::KIND,
            %category_id,
            has_q = search.is_some(),
            stage = query.stage_id.map(|id| id.to_string()),
            sort = query.sort.as_str(),
            active_only = query.active_only
        );

        let mut select = Self::scoped().filter(pipeline_item::Column::CategoryId.eq(category_id));
        if query.active_only {
            select = select.filter(pipeline_item::Column::IsActive.eq(true));
        }
        if let Some(stage_id) = query.stage_id {
            select = select.filter(pipeline_item::Column::StageId.eq(stage_id));
        }
        if let Some(q) = search {
            let pattern = format!("%{}%", q.to_lowercase());
            select = select.filter(
                Expr::expr(Func::lower(Expr::col(pipeline_item::Column::Title))).like(pattern),
            );
        }
        select = select
            .order_by(query.sort.column(), query.direction.order())
            .order_by_asc(pipeline_item::Column::Order)
            .order_by_asc(pipeline_item::Column::CreatedAt);

        let models = select
            .all(self.db.as_ref())
            .instrument(span)
            .await
            .map_err(storage("list_by_category", category_id))?;
        models.into_iter().map(PipelineItem::from_model).collect()
    }

    pub async fn list_by_responsible_user(
        &self,
        user_id: Uuid,
        active_only: bool,
    ) -> PipelineResult<Vec<PipelineItem<F>>> {
        let mut select =
            Self::scoped().filter(pipeline_item::Column::ResponsibleUserId.eq(user_id));
        if active_only {
            select = select.filter(pipeline_item::Column::IsActive.eq(true));
        }
        let models = select
            .order_by_asc(pipeline_item::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(storage("list_by_responsible_user", user_id))?;
        models.into_iter().map(PipelineItem::from_model).collect()
    }

    pub async fn count_by_category(&self, category_id: Uuid, active_only: bool) -> PipelineResult<u64> {
        let mut select = Self::scoped().filter(pipeline_item::Column::CategoryId.eq(category_id));
        if active_only {
            select = select.filter(pipeline_item::Column::IsActive.eq(true));
        }
        select
            .count(self.db.as_ref())
            .await
            .map_err(storage("count_by_category", category_id))
    }

    /// Sum of the value column; items without a value count as zero.
    pub async fn sum_value_by_category(&self, category_id: Uuid, active_only: bool) -> PipelineResult<f64> {
        let mut select = Self::scoped().filter(pipeline_item::Column::CategoryId.eq(category_id));
        if active_only {
            select = select.filter(pipeline_item::Column::IsActive.eq(true));
        }
        let row = select
            .select_only()
            .column_as(Expr::col(pipeline_item::Column::Value).sum(), "total")
            .into_model::<ValueTotalRow>()
            .one(self.db.as_ref())
            .await
            .map_err(storage("sum_value_by_category", category_id))?;
        Ok(row.and_then(|row| row.total).unwrap_or(0.0))
    }

    pub async fn count_in_stage(&self, stage_id: Uuid) -> PipelineResult<u64> {
        Self::count_in_stage_in(self.db.as_ref(), stage_id, None).await
    }

    /// Active items of `stage_id`, optionally leaving one item out.
    pub async fn count_in_stage_in<C: ConnectionTrait>(
        conn: &C,
        stage_id: Uuid,
        excluding: Option<Uuid>,
    ) -> PipelineResult<u64> {
        let mut select = Self::scoped()
            .filter(pipeline_item::Column::StageId.eq(stage_id))
            .filter(pipeline_item::Column::IsActive.eq(true));
        if let Some(id) = excluding {
            select = select.filter(pipeline_item::Column::Id.ne(id));
        }
        select
            .count(conn)
            .await
            .map_err(storage("count_in_stage", stage_id))
    }

    async fn max_order_in<C: ConnectionTrait>(
        conn: &C,
        stage_id: Uuid,
        excluding: Option<Uuid>,
    ) -> PipelineResult<Option<i32>> {
        let mut select = Self::scoped()
            .filter(pipeline_item::Column::StageId.eq(stage_id))
            .filter(pipeline_item::Column::IsActive.eq(true));
        if let Some(id) = excluding {
            select = select.filter(pipeline_item::Column::Id.ne(id));
        }
        let row = select
            .select_only()
            .column_as(Expr::col(pipeline_item::Column::Order).max(), "max_order")
            .into_model::<MaxOrderRow>()
            .one(conn)
            .await
            .map_err(storage("max_order", stage_id))?;
        Ok(row.and_then(|row| row.max_order))
    }

    async fn stage_orders<C: ConnectionTrait>(conn: &C, stage_id: Uuid) -> PipelineResult<Vec<i32>> {
        Self::scoped()
            .select_only()
            .column(pipeline_item::Column::Order)
            .filter(pipeline_item::Column::StageId.eq(stage_id))
            .filter(pipeline_item::Column::IsActive.eq(true))
            .into_tuple()
            .all(conn)
            .await
            .map_err(storage("stage_orders", stage_id))
    }

    async fn density<C: ConnectionTrait>(conn: &C, stages: &[Uuid]) -> PipelineResult<Vec<bool>> {
        let mut dense = Vec::with_capacity(stages.len());
        for stage_id in stages {
            dense.push(sequencer::is_dense(&Self::stage_orders(conn, *stage_id).await?));
        }
        Ok(dense)
    }

    /// A stage that was dense before the write must still be dense after it.
    async fn ensure_dense<C: ConnectionTrait>(
        conn: &C,
        stages: &[Uuid],
        before: &[bool],
        target: &str,
    ) -> PipelineResult<()> {
        for (stage_id, was_dense) in stages.iter().zip(before) {
            if *was_dense && !sequencer::is_dense(&Self::stage_orders(conn, *stage_id).await?) {
                warn!(%stage_id, "stage lost density, rolling back");
                return Err(PipelineError::conflict(target));
            }
        }
        Ok(())
    }

    /// Shift active siblings in place. Siblings keep their revision.
    async fn apply_shift<C: ConnectionTrait>(
        conn: &C,
        shift: &OrderShift,
        moved: Uuid,
    ) -> PipelineResult<u64> {
        let mut update = pipeline_item::Entity::update_many()
            .col_expr(
                pipeline_item::Column::Order,
                Expr::col(pipeline_item::Column::Order).add(shift.delta),
            )
            .filter(pipeline_item::Column::Kind.eq(F::KIND))
            .filter(pipeline_item::Column::StageId.eq(shift.stage_id))
            .filter(pipeline_item::Column::IsActive.eq(true))
            .filter(pipeline_item::Column::Id.ne(moved))
            .filter(pipeline_item::Column::Order.gte(shift.from));
        if let Some(to) = shift.to {
            update = update.filter(pipeline_item::Column::Order.lte(to));
        }
        let result = update
            .exec(conn)
            .await
            .map_err(storage("shift_orders", shift.stage_id))?;
        Ok(result.rows_affected)
    }

    /// Guarded write of `changes` on top of `current`, followed by the
    /// pre-image revision record.
    async fn swap<C: ConnectionTrait>(
        conn: &C,
        current: &PipelineItem<F>,
        mut changes: pipeline_item::ActiveModel,
        action: RevisionAction,
        actor: Option<Uuid>,
    ) -> PipelineResult<i32> {
        let target = Self::target(current.id);
        let next = current.revision + 1;
        changes.revision = Set(next);
        changes.updated_at = Set(Some(Utc::now().into()));
        changes.updated_by = Set(actor);

        let result = pipeline_item::Entity::update_many()
            .set(changes)
            .filter(pipeline_item::Column::Id.eq(current.id))
            .filter(pipeline_item::Column::Revision.eq(current.revision))
            .exec(conn)
            .await
            .map_err(storage("update_item", &target))?;
        store::expect_swapped(result.rows_affected, &target)?;

        store::append_revision(
            conn,
            RevisionEntry {
                kind: F::KIND,
                collection: RevisionCollection::Item,
                revision_of: current.id,
                revision_number: next,
                action,
                snapshot: store::snapshot(current, &target)?,
                recorded_by: actor,
            },
        )
        .await?;
        Ok(next)
    }

    /// Update domain fields and the responsible user. Stage and order are
    /// left alone.
    #[instrument(name = "item.update", skip_all, fields(kind = %F::KIND, item_id = %id))]
    pub async fn update(
        &self,
        id: Uuid,
        update: ItemUpdate<F>,
        actor: Option<Uuid>,
    ) -> PipelineResult<PipelineItem<F>> {
        let target = Self::target(id);
        let txn = self.db.begin().await.map_err(storage("begin", &target))?;
        let current = Self::get_in(&txn, id).await?;

        let mut fields = current.fields.clone();
        fields.apply(update.fields);
        let mut changes = pipeline_item::ActiveModel {
            title: Set(fields.title().to_string()),
            value: Set(fields.value()),
            details: Set(store::snapshot(&fields, &target)?),
            ..Default::default()
        };
        if let Some(user_id) = update.responsible_user_id {
            changes.responsible_user_id = Set(user_id);
        }
        Self::swap(&txn, &current, changes, RevisionAction::Update, actor).await?;

        let updated = Self::get_in(&txn, id).await?;
        txn.commit().await.map_err(storage("commit", &target))?;
        Ok(updated)
    }

    /// Mark the item deleted and close the gap it leaves behind.
    #[instrument(name = "item.soft_delete", skip_all, fields(kind = %F::KIND, item_id = %id))]
    pub async fn soft_delete(&self, id: Uuid, actor: Option<Uuid>) -> PipelineResult<PipelineItem<F>> {
        let changes = pipeline_item::ActiveModel {
            is_active: Set(false),
            ..Default::default()
        };
        self.retire(id, changes, RevisionAction::Delete, actor).await
    }

    /// Mark the item closed (`closed_at = now`) and close its gap.
    #[instrument(name = "item.close", skip_all, fields(kind = %F::KIND, item_id = %id))]
    pub async fn close(&self, id: Uuid, actor: Option<Uuid>) -> PipelineResult<PipelineItem<F>> {
        let changes = pipeline_item::ActiveModel {
            is_active: Set(false),
            closed_at: Set(Some(Utc::now().into())),
            ..Default::default()
        };
        self.retire(id, changes, RevisionAction::Close, actor).await
    }

    async fn retire(
        &self,
        id: Uuid,
        changes: pipeline_item::ActiveModel,
        action: RevisionAction,
        actor: Option<Uuid>,
    ) -> PipelineResult<PipelineItem<F>> {
        let target = Self::target(id);
        let txn = self.db.begin().await.map_err(storage("begin", &target))?;
        let current = Self::get_locked(&txn, id).await?;
        if !current.is_active {
            return Err(PipelineError::ItemInactive { kind: F::KIND, id });
        }

        let stages = [current.stage_id];
        let dense_before = Self::density(&txn, &stages).await?;
        Self::swap(&txn, &current, changes, action, actor).await?;
        let shifted = Self::apply_shift(&txn, &sequencer::close_gap(current.slot()), id).await?;
        Self::ensure_dense(&txn, &stages, &dense_before, &target).await?;

        let retired = Self::get_in(&txn, id).await?;
        txn.commit().await.map_err(storage("commit", &target))?;
        debug!(shifted, "gap closed");
        Ok(retired)
    }

    /// Move an item within its stage or into another stage of the same
    /// category. Moving to the current slot writes nothing.
    #[instrument(
        name = "item.move_to_stage",
        skip_all,
        fields(kind = %F::KIND, item_id = %id, stage_id = %request.stage_id)
    )]
    pub async fn move_to_stage(
        &self,
        id: Uuid,
        request: MoveRequest,
        actor: Option<Uuid>,
    ) -> PipelineResult<PipelineItem<F>> {
        let target = Self::target(id);
        let txn = self.db.begin().await.map_err(storage("begin", &target))?;

        let current = Self::get_locked(&txn, id).await?;
        if !current.is_active {
            return Err(PipelineError::ItemInactive { kind: F::KIND, id });
        }
        if let Some(expected) = request.expected_revision {
            if expected != current.revision {
                warn!(expected, actual = current.revision, "stale move rejected");
                return Err(PipelineError::conflict(&target));
            }
        }

        let siblings = Self::count_in_stage_in(&txn, request.stage_id, Some(id)).await?;
        let max_order = Self::max_order_in(&txn, request.stage_id, Some(id)).await?;
        let order = sequencer::resolve_order(request.order, siblings, max_order)?;

        let plan = sequencer::plan_move(current.slot(), Slot::new(request.stage_id, order));
        let MovePlan::Apply { shifts, target: slot } = &plan else {
            debug!("item already in place");
            return Ok(current);
        };

        let touched = plan.touched_stages();
        let dense_before = Self::density(&txn, &touched).await?;

        for shift in shifts {
            Self::apply_shift(&txn, shift, id).await?;
        }
        let changes = pipeline_item::ActiveModel {
            stage_id: Set(slot.stage_id),
            order: Set(slot.order),
            ..Default::default()
        };
        Self::swap(&txn, &current, changes, RevisionAction::Move, actor).await?;
        Self::ensure_dense(&txn, &touched, &dense_before, &target).await?;

        let moved = Self::get_in(&txn, id).await?;
        txn.commit().await.map_err(storage("commit", &target))?;
        info!(
            from_stage = %current.stage_id,
            from_order = current.order,
            to_order = moved.order,
            revision = moved.revision,
            "item moved"
        );
        Ok(moved)
    }

    /// Append every active item of `from` to the end of `to`, keeping their
    /// relative order. Each item gets its own move revision. The caller holds
    /// the category lock.
    pub async fn evacuate_stage_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        from: Uuid,
        to: Uuid,
        actor: Option<Uuid>,
    ) -> PipelineResult<u64> {
        let evacuees = Self::scoped()
            .filter(pipeline_item::Column::StageId.eq(from))
            .filter(pipeline_item::Column::IsActive.eq(true))
            .order_by_asc(pipeline_item::Column::Order)
            .all(conn)
            .await
            .map_err(storage("evacuate_stage", from))?;

        let mut next = sequencer::default_order(Self::max_order_in(conn, to, None).await?);
        let mut moved = 0;
        for model in evacuees {
            let current = PipelineItem::<F>::from_model(model)?;
            let changes = pipeline_item::ActiveModel {
                stage_id: Set(to),
                order: Set(next),
                ..Default::default()
            };
            Self::swap(conn, &current, changes, RevisionAction::Move, actor).await?;
            next += 1;
            moved += 1;
        }
        Ok(moved)
    }

    pub async fn history(&self, id: Uuid) -> PipelineResult<Vec<RevisionRecord>> {
        store::list_revisions(self.db.as_ref(), F::KIND, RevisionCollection::Item, id).await
    }
}
