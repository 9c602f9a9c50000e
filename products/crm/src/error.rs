use entity::PipelineKind;
use platform_api::ApiError;
use sea_orm::{DbErr, RuntimeErr, SqlErr};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{kind} category {id} not found")]
    NoSuchCategory { kind: PipelineKind, id: Uuid },
    #[error("{kind} {id} not found")]
    NoSuchItem { kind: PipelineKind, id: Uuid },
    #[error("user {0} not found")]
    NoSuchUser(Uuid),
    #[error("invalid stage: {0}")]
    InvalidStage(String),
    #[error("invalid order {0}: must be zero or greater")]
    InvalidOrder(i32),
    #[error("{kind} {id} is closed or deleted")]
    ItemInactive { kind: PipelineKind, id: Uuid },
    #[error("stage {stage_id} still holds {count} active item(s)")]
    StageInUse { stage_id: Uuid, count: u64 },
    #[error("a user with email {0} already exists")]
    EmailTaken(String),
    #[error("{target} was modified concurrently; reload and retry")]
    ConcurrentModification { target: String },
    #[error("storage failure during {operation} on {target}: {source}")]
    Storage {
        operation: &'static str,
        target: String,
        #[source]
        source: DbErr,
    },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub(crate) fn conflict(target: impl std::fmt::Display) -> Self {
        PipelineError::ConcurrentModification {
            target: target.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PipelineError::NoSuchCategory { .. }
                | PipelineError::NoSuchItem { .. }
                | PipelineError::NoSuchUser(_)
        )
    }
}

/// Wrap a `DbErr` with the operation and target it happened on.
pub(crate) fn storage(
    operation: &'static str,
    target: impl std::fmt::Display,
) -> impl FnOnce(DbErr) -> PipelineError {
    let target = target.to_string();
    move |source| {
        if is_contention(&source) {
            return PipelineError::ConcurrentModification { target };
        }
        PipelineError::Storage {
            operation,
            target,
            source,
        }
    }
}

/// Like [`storage`], but a unique violation also counts as a conflict. Only
/// for inserts whose unique key is a revision number.
pub(crate) fn revision_storage(
    operation: &'static str,
    target: impl std::fmt::Display,
) -> impl FnOnce(DbErr) -> PipelineError {
    let target = target.to_string();
    move |source| {
        if matches!(source.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
            return PipelineError::ConcurrentModification { target };
        }
        storage(operation, target)(source)
    }
}

const DEADLOCK_DETECTED: &str = "40P01";
const SERIALIZATION_FAILURE: &str = "40001";

/// Postgres aborted the statement because of another transaction.
fn is_contention(err: &DbErr) -> bool {
    matches!(
        sqlstate(err).as_deref(),
        Some(DEADLOCK_DETECTED | SERIALIZATION_FAILURE)
    )
}

fn sqlstate(err: &DbErr) -> Option<String> {
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(source)) | DbErr::Query(RuntimeErr::SqlxError(source)) => {
            source.as_database_error()?.code().map(|code| code.into_owned())
        }
        _ => None,
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NoSuchCategory { .. }
            | PipelineError::NoSuchItem { .. }
            | PipelineError::NoSuchUser(_) => ApiError::NotFound(err.to_string()),
            PipelineError::InvalidStage(_)
            | PipelineError::InvalidOrder(_)
            | PipelineError::ItemInactive { .. }
            | PipelineError::StageInUse { .. }
            | PipelineError::EmailTaken(_) => ApiError::InvalidInput(err.to_string()),
            PipelineError::ConcurrentModification { .. } => ApiError::Conflict(err.to_string()),
            PipelineError::Storage { .. } => ApiError::internal(err.into()),
        }
    }
}
