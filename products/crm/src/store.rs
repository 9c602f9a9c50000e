//! Revision log and compare-and-swap helpers shared by the repositories.

use chrono::Utc;
use entity::{PipelineKind, RevisionAction, RevisionCollection, pipeline_category, pipeline_revision};
use sea_orm::entity::prelude::*;
use sea_orm::{ConnectionTrait, QueryOrder, QuerySelect, Set};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult, revision_storage, storage};

/// One audit entry: the parent document as it was before `revision_number`
/// was written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub id: Uuid,
    pub kind: PipelineKind,
    pub collection: RevisionCollection,
    pub revision_of: Uuid,
    pub revision_number: i32,
    pub action: RevisionAction,
    pub snapshot: serde_json::Value,
    pub recorded_at: DateTimeWithTimeZone,
    pub recorded_by: Option<Uuid>,
}

impl From<pipeline_revision::Model> for RevisionRecord {
    fn from(model: pipeline_revision::Model) -> Self {
        Self {
            id: model.id,
            kind: model.kind,
            collection: model.collection,
            revision_of: model.revision_of,
            revision_number: model.revision_number,
            action: model.action,
            snapshot: model.snapshot,
            recorded_at: model.recorded_at,
            recorded_by: model.recorded_by,
        }
    }
}

pub(crate) struct RevisionEntry {
    pub kind: PipelineKind,
    pub collection: RevisionCollection,
    pub revision_of: Uuid,
    pub revision_number: i32,
    pub action: RevisionAction,
    pub snapshot: serde_json::Value,
    pub recorded_by: Option<Uuid>,
}

pub(crate) async fn append_revision<C: ConnectionTrait>(
    conn: &C,
    entry: RevisionEntry,
) -> PipelineResult<()> {
    let target = format!("{} {}", entry.kind, entry.revision_of);
    let record = pipeline_revision::ActiveModel {
        id: Set(Uuid::new_v4()),
        kind: Set(entry.kind),
        collection: Set(entry.collection),
        revision_of: Set(entry.revision_of),
        revision_number: Set(entry.revision_number),
        action: Set(entry.action),
        snapshot: Set(entry.snapshot),
        recorded_at: Set(Utc::now().into()),
        recorded_by: Set(entry.recorded_by),
    };
    pipeline_revision::Entity::insert(record)
        .exec_without_returning(conn)
        .await
        .map_err(revision_storage("append_revision", target))?;
    Ok(())
}

/// Take the row lock on a category for the rest of the transaction. Every
/// write that renumbers items in one of its stages goes through here first,
/// so positions read afterwards are current. SQLite has no row locks and
/// serialises writers on its own.
pub(crate) async fn lock_category<C: ConnectionTrait>(
    conn: &C,
    kind: PipelineKind,
    id: Uuid,
) -> PipelineResult<()> {
    let locked: Option<Uuid> = pipeline_category::Entity::find_by_id(id)
        .filter(pipeline_category::Column::Kind.eq(kind))
        .select_only()
        .column(pipeline_category::Column::Id)
        .lock_exclusive()
        .into_tuple()
        .one(conn)
        .await
        .map_err(storage("lock_category", id))?;
    match locked {
        Some(_) => Ok(()),
        None => Err(PipelineError::NoSuchCategory { kind, id }),
    }
}

pub(crate) async fn list_revisions<C: ConnectionTrait>(
    conn: &C,
    kind: PipelineKind,
    collection: RevisionCollection,
    revision_of: Uuid,
) -> PipelineResult<Vec<RevisionRecord>> {
    let rows = pipeline_revision::Entity::find()
        .filter(pipeline_revision::Column::Kind.eq(kind))
        .filter(pipeline_revision::Column::Collection.eq(collection))
        .filter(pipeline_revision::Column::RevisionOf.eq(revision_of))
        .order_by_asc(pipeline_revision::Column::RevisionNumber)
        .all(conn)
        .await
        .map_err(storage("list_revisions", revision_of))?;
    Ok(rows.into_iter().map(RevisionRecord::from).collect())
}

/// A guarded update must touch exactly the one row whose revision it read.
pub(crate) fn expect_swapped(rows_affected: u64, target: impl std::fmt::Display) -> PipelineResult<()> {
    if rows_affected == 1 {
        Ok(())
    } else {
        Err(PipelineError::conflict(target))
    }
}

pub(crate) fn snapshot<T: Serialize>(
    value: &T,
    target: impl std::fmt::Display,
) -> PipelineResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|err| PipelineError::Storage {
        operation: "snapshot",
        target: target.to_string(),
        source: DbErr::Json(err.to_string()),
    })
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
    target: impl std::fmt::Display,
) -> PipelineResult<T> {
    serde_json::from_value(value).map_err(|err| PipelineError::Storage {
        operation: "decode",
        target: target.to_string(),
        source: DbErr::Json(err.to_string()),
    })
}
