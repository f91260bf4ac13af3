//! Just-in-time user provisioning.

use chrono::Utc;
use uuid::Uuid;

use grid_core::GridError;
use grid_data::{DataError, User, UserRepository};

/// Idempotently resolve a user by upstream subject, creating the record on
/// first login. Concurrent first logins race on the unique subject; the
/// loser re-reads the winner's row.
pub async fn jit_provision_user(
    users: &dyn UserRepository,
    subject: &str,
    email: &str,
    display_name: &str,
) -> Result<User, GridError> {
    if let Some(existing) = users.find_by_subject(subject).await? {
        return Ok(existing);
    }

    let user = User {
        id: Uuid::now_v7(),
        subject: Some(subject.to_string()),
        email: email.to_string(),
        display_name: display_name.to_string(),
        disabled: false,
        created_at: Utc::now(),
        last_used_at: None,
    };
    match users.insert(&user).await {
        Ok(()) => Ok(user),
        Err(DataError::Conflict(_)) => users
            .find_by_subject(subject)
            .await?
            .ok_or_else(|| GridError::already_exists(format!("user with email '{email}'"))),
        Err(err) => Err(err.into()),
    }
}
