use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

/// What happens to active items when their stage is soft-deleted.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum StageDeletePolicy {
    /// Refuse while the stage still holds active items.
    #[default]
    Block,
    /// Append the items to another stage of the same category.
    ReassignTo(Uuid),
    /// Leave the items where they are.
    AllowDangling,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown stage delete policy `{0}` (expected block, allow_dangling or reassign:<stage-id>)")]
pub struct ParsePolicyError(String);

impl FromStr for StageDeletePolicy {
    type Err = ParsePolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "block" => return Ok(StageDeletePolicy::Block),
            "allow_dangling" | "dangling" => return Ok(StageDeletePolicy::AllowDangling),
            _ => {}
        }
        trimmed
            .split_once(':')
            .filter(|(prefix, _)| prefix.eq_ignore_ascii_case("reassign"))
            .and_then(|(_, id)| Uuid::parse_str(id.trim()).ok())
            .map(StageDeletePolicy::ReassignTo)
            .ok_or_else(|| ParsePolicyError(trimmed.to_string()))
    }
}

impl fmt::Display for StageDeletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageDeletePolicy::Block => f.write_str("block"),
            StageDeletePolicy::ReassignTo(stage_id) => write!(f, "reassign:{stage_id}"),
            StageDeletePolicy::AllowDangling => f.write_str("allow_dangling"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PipelineSettings {
    pub stage_delete_policy: StageDeletePolicy,
}
