use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use entity::users;
use platform_authz::{AuthzError, Role, RoleSource};
use sea_orm::entity::prelude::*;
use sea_orm::{DatabaseConnection, Set, SqlErr};
use serde::Serialize;
use tracing::warn;

use crate::error::{PipelineError, PipelineResult, storage};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub roles: Vec<String>,
    pub is_active: bool,
}

impl From<users::Model> for UserRecord {
    fn from(model: users::Model) -> Self {
        let roles = serde_json::from_value(model.roles).unwrap_or_else(|err| {
            warn!(user_id = %model.id, error = %err, "malformed roles column");
            Vec::new()
        });
        Self {
            id: model.id,
            email: model.email,
            display_name: model.display_name,
            roles,
            is_active: model.is_active,
        }
    }
}

/// Lookup of the users that can own pipeline items.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: Uuid) -> PipelineResult<Option<UserRecord>>;
}

#[derive(Clone)]
pub struct DbUserDirectory {
    db: Arc<DatabaseConnection>,
}

impl DbUserDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn register(
        &self,
        email: &str,
        display_name: Option<&str>,
        roles: &[Role],
    ) -> PipelineResult<UserRecord> {
        let id = Uuid::new_v4();
        let keys: Vec<&str> = roles.iter().map(|role| role.as_str()).collect();
        let model = users::ActiveModel {
            id: Set(id),
            email: Set(email.to_string()),
            display_name: Set(display_name.map(str::to_string)),
            roles: Set(serde_json::json!(keys)),
            is_active: Set(true),
            created_at: Set(Utc::now().into()),
        };
        let model = model
            .insert(self.db.as_ref())
            .await
            .map_err(|err| match err.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => {
                    PipelineError::EmailTaken(email.to_string())
                }
                _ => storage("register_user", email)(err),
            })?;
        Ok(model.into())
    }

    pub async fn find_by_email(&self, email: &str) -> PipelineResult<Option<UserRecord>> {
        let model = users::Entity::find()
            .filter(users::Column::Email.eq(email))
            .one(self.db.as_ref())
            .await
            .map_err(storage("find_user", email))?;
        Ok(model.map(UserRecord::from))
    }
}

#[async_trait]
impl UserDirectory for DbUserDirectory {
    async fn get_user(&self, id: Uuid) -> PipelineResult<Option<UserRecord>> {
        let model = users::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(storage("get_user", id))?;
        Ok(model.map(UserRecord::from))
    }
}

#[async_trait]
impl RoleSource for DbUserDirectory {
    async fn roles_of(&self, user_id: Uuid) -> Result<Vec<Role>, AuthzError> {
        let user = self
            .get_user(user_id)
            .await
            .map_err(|err| AuthzError::Lookup(err.to_string()))?;
        let Some(user) = user.filter(|user| user.is_active) else {
            return Ok(Vec::new());
        };
        Ok(user
            .roles
            .iter()
            .filter_map(|key| Role::from_key(key))
            .collect())
    }
}
