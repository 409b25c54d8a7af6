//! User repository.

use crate::error::StoreResult;
use crate::models::UserRow;
use async_trait::async_trait;
use niviz_core::NewUser;

/// Repository for user accounts.
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Create a user.
    async fn create_user(&self, user: &NewUser) -> StoreResult<UserRow>;

    /// Get a user by ID.
    async fn get_user(&self, user_id: i64) -> StoreResult<Option<UserRow>>;

    /// Get a user by username.
    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<UserRow>>;

    /// List all users.
    async fn list_users(&self) -> StoreResult<Vec<UserRow>>;

    /// Update the activation and admin flags.
    async fn set_user_flags(
        &self,
        user_id: i64,
        is_active: bool,
        is_admin: bool,
    ) -> StoreResult<UserRow>;
}
