//! sea-orm models for the pipeline store.

pub mod pipeline_category;
pub mod pipeline_item;
pub mod pipeline_revision;
pub mod sea_orm_active_enums;
pub mod users;

pub use sea_orm_active_enums::{PipelineKind, RevisionAction, RevisionCollection};
