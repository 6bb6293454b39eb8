use std::collections::BTreeSet;

use chrono::Utc;
use sqlx::Row;

use goosebot_core::domain::user::{Permission, Role, UserMapping};

use super::{decode_err, parse_timestamp, RepositoryError, UserMappingRepository};
use crate::DbPool;

pub struct SqlUserMappingRepository {
    pool: DbPool,
}

impl SqlUserMappingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_mapping(row: &sqlx::sqlite::SqliteRow) -> Result<UserMapping, RepositoryError> {
    let roles: String = row.try_get("roles").map_err(decode_err)?;
    let permissions: String = row.try_get("permissions").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    let roles: Vec<Role> = serde_json::from_str(&roles).map_err(decode_err)?;
    let permissions: BTreeSet<Permission> =
        serde_json::from_str(&permissions).map_err(decode_err)?;

    Ok(UserMapping {
        slack_user_id: row.try_get("slack_user_id").map_err(decode_err)?,
        internal_user_id: row.try_get("internal_user_id").map_err(decode_err)?,
        ldap_id: row.try_get("ldap_id").map_err(decode_err)?,
        email: row.try_get("email").map_err(decode_err)?,
        full_name: row.try_get("full_name").map_err(decode_err)?,
        roles,
        permissions,
        is_active: row.try_get::<i64, _>("is_active").map_err(decode_err)? != 0,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait::async_trait]
impl UserMappingRepository for SqlUserMappingRepository {
    async fn find_by_slack_id(
        &self,
        slack_user_id: &str,
    ) -> Result<Option<UserMapping>, RepositoryError> {
        let row = sqlx::query(
            "SELECT slack_user_id, internal_user_id, ldap_id, email, full_name, roles,
                    permissions, is_active, created_at, updated_at
             FROM user_mappings WHERE slack_user_id = ?",
        )
        .bind(slack_user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_mapping).transpose()
    }

    async fn save(&self, mapping: UserMapping) -> Result<(), RepositoryError> {
        let roles = serde_json::to_string(&mapping.roles).map_err(decode_err)?;
        let permissions = serde_json::to_string(&mapping.permissions).map_err(decode_err)?;

        sqlx::query(
            "INSERT INTO user_mappings (id, slack_user_id, internal_user_id, ldap_id, email,
                                        full_name, roles, permissions, is_active,
                                        created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(slack_user_id) DO UPDATE SET
                 internal_user_id = excluded.internal_user_id,
                 ldap_id = excluded.ldap_id,
                 email = excluded.email,
                 full_name = excluded.full_name,
                 roles = excluded.roles,
                 permissions = excluded.permissions,
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&mapping.slack_user_id)
        .bind(&mapping.internal_user_id)
        .bind(&mapping.ldap_id)
        .bind(&mapping.email)
        .bind(&mapping.full_name)
        .bind(roles)
        .bind(permissions)
        .bind(i64::from(mapping.is_active))
        .bind(mapping.created_at.to_rfc3339())
        .bind(mapping.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<UserMapping>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT slack_user_id, internal_user_id, ldap_id, email, full_name, roles,
                    permissions, is_active, created_at, updated_at
             FROM user_mappings ORDER BY slack_user_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_mapping).collect()
    }

    async fn deactivate(&self, slack_user_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE user_mappings SET is_active = 0, updated_at = ?
             WHERE slack_user_id = ? AND is_active = 1",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(slack_user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
