//! Account registration and the admin-only role and fraud controls.

use serde::Deserialize;
use std::sync::Arc;

use super::require_admin;
use crate::domain::{Role, User};
use crate::error::AppError;
use crate::middleware::auth::Identity;
use crate::ports::{RepositoryResult, UserRepository};
use crate::validation::{sanitize_string, validate_email, validate_max_len, ValidationError, NAME_MAX_LEN};

/// Optional profile fields a client may send on registration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub name: Option<String>,
    pub photo_url: Option<String>,
}

/// Body of `PUT /users/:id`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub role: Option<Role>,
    pub is_fraud: Option<bool>,
}

pub struct UserDirectory {
    users: Arc<dyn UserRepository>,
}

impl UserDirectory {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Creates the caller's account on first sign-in, refreshing profile
    /// fields afterwards. Role and fraud flag are never taken from the client.
    pub async fn register(&self, identity: &Identity, profile: Registration) -> Result<User, AppError> {
        let email = identity
            .email
            .clone()
            .ok_or_else(|| ValidationError::new("email", "identity token carries no email"))?;
        validate_email("email", &email)?;

        let name = profile
            .name
            .or_else(|| identity.name.clone())
            .map(|n| sanitize_string(&n))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        validate_max_len("name", &name, NAME_MAX_LEN)?;

        let photo_url = profile
            .photo_url
            .or_else(|| identity.picture.clone())
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        let user = User::new(identity.user_id.clone(), email, name, photo_url);
        let stored = self.users.upsert(&user).await?;
        tracing::info!(user_id = %stored.id, role = %stored.role, "User registered");
        Ok(stored)
    }

    pub async fn find(&self, id: &str) -> RepositoryResult<User> {
        self.users.get_by_id(id).await
    }

    pub async fn list(&self, admin: &User) -> Result<Vec<User>, AppError> {
        require_admin(admin, "list users")?;
        Ok(self.users.list().await?)
    }

    pub async fn update(&self, admin: &User, id: &str, update: UserUpdate) -> Result<User, AppError> {
        require_admin(admin, "manage users")?;
        if update.role.is_none() && update.is_fraud.is_none() {
            return Err(ValidationError::new("role", "nothing to update").into());
        }

        let mut user = self.users.get_by_id(id).await?;

        if let Some(role) = update.role {
            if user.id == admin.id && role != Role::Admin {
                return Err(AppError::Forbidden(
                    "admins cannot remove their own admin role".to_string(),
                ));
            }
            if role != user.role {
                user = self.users.set_role(id, role).await?;
                tracing::info!(user_id = %id, admin_id = %admin.id, role = %role, "User role changed");
            }
        }

        if let Some(is_fraud) = update.is_fraud {
            if is_fraud && user.role != Role::Vendor {
                return Err(ValidationError::new(
                    "isFraud",
                    "only vendor accounts can be flagged as fraud",
                )
                .into());
            }
            user = self.users.set_fraud(id, is_fraud).await?;
            tracing::warn!(user_id = %id, admin_id = %admin.id, is_fraud, "Vendor fraud flag changed");
        }

        Ok(user)
    }

    /// Unauthenticated role assignment for operators bootstrapping the
    /// first admin from the command line.
    pub async fn assign_role(&self, id: &str, role: Role) -> Result<User, AppError> {
        let user = self.users.set_role(id, role).await?;
        tracing::info!(user_id = %id, role = %role, "User role assigned by operator");
        Ok(user)
    }
}
