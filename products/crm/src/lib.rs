//! Deal and buyer pipelines.
//!
//! Items live in ordered stages of a category ("funnel"). Every active item of
//! a stage holds a distinct `order` in `0..N`; moves, closes and deletes shift
//! siblings to keep it that way. Every write to a category or item bumps its
//! `revision` under a compare-and-swap and appends the previous image to the
//! revision log, all inside one transaction.

pub mod categories;
pub mod error;
pub mod fields;
pub mod items;
pub mod manager;
pub mod sequencer;
pub mod settings;
pub mod store;
pub mod users;

pub use categories::{Category, CategoryPatch, CategoryRepository, NewCategory, Stage, StageDraft};
pub use error::{PipelineError, PipelineResult};
pub use fields::{BuyerFields, BuyerPatch, DealFields, DealPatch, PipelineFields};
pub use items::{
    ItemQuery, ItemRepository, ItemUpdate, MoveRequest, NewItem, PipelineItem, SortDirection,
    SortField,
};
pub use manager::{BuyersManager, DealsManager, PipelineManager};
pub use settings::{ParsePolicyError, PipelineSettings, StageDeletePolicy};
pub use store::RevisionRecord;
pub use users::{DbUserDirectory, UserDirectory, UserRecord};
