use sqlx::{PgPool, Row};

use crate::StorageError;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct GroupMember {
    pub user_id: String,
    pub role_level: i32,
}

/// Read-only lookup of a group's current membership.
pub async fn members(pool: &PgPool, group_id: &str) -> Result<Vec<GroupMember>, StorageError> {
    let rows = sqlx::query("SELECT user_id, role_level FROM group_members WHERE group_id = $1")
        .bind(group_id)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|r| GroupMember {
            user_id: r.get("user_id"),
            role_level: r.get("role_level"),
        })
        .collect())
}
