use serde::Serialize;

use super::{Permission, Role};
use crate::error::AppError;

/// An operator account: the staff member driving the console, not a student.
#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub display_name: String,
    pub archived: bool,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub display_name: Option<String>,
    pub archived: bool,
}

impl From<DbUser> for User {
    fn from(user: DbUser) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: Role::from_str(&user.role).unwrap_or(Role::Teacher),
            display_name: user.display_name.unwrap_or_default(),
            archived: user.archived,
        }
    }
}

impl User {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), AppError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(AppError::Authorization(format!(
                "Role '{}' may not perform this action",
                self.role
            )))
        }
    }
}
