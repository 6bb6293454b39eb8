use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Analyst,
    Admin,
    SuperAdmin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    QueryExecute,
    QueryHistory,
    QueryShare,
    UserAdmin,
    SystemAdmin,
    AuditView,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Viewer, Role::Analyst, Role::Admin, Role::SuperAdmin];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Analyst => "analyst",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }

    pub fn permissions(self) -> &'static [Permission] {
        use Permission::*;
        match self {
            Self::Viewer => &[QueryHistory],
            Self::Analyst => &[QueryExecute, QueryHistory, QueryShare],
            Self::Admin => &[QueryExecute, QueryHistory, QueryShare, UserAdmin, AuditView],
            Self::SuperAdmin => {
                &[QueryExecute, QueryHistory, QueryShare, UserAdmin, SystemAdmin, AuditView]
            }
        }
    }
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QueryExecute => "query_execute",
            Self::QueryHistory => "query_history",
            Self::QueryShare => "query_share",
            Self::UserAdmin => "user_admin",
            Self::SystemAdmin => "system_admin",
            Self::AuditView => "audit_view",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Self::Viewer),
            "analyst" => Ok(Self::Analyst),
            "admin" => Ok(Self::Admin),
            "super_admin" => Ok(Self::SuperAdmin),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown role `{other}` (expected viewer|analyst|admin|super_admin)"
            ))),
        }
    }
}

impl FromStr for Permission {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "query_execute" => Ok(Self::QueryExecute),
            "query_history" => Ok(Self::QueryHistory),
            "query_share" => Ok(Self::QueryShare),
            "user_admin" => Ok(Self::UserAdmin),
            "system_admin" => Ok(Self::SystemAdmin),
            "audit_view" => Ok(Self::AuditView),
            other => Err(DomainError::InvariantViolation(format!("unknown permission `{other}`"))),
        }
    }
}

/// Union of the permissions granted by `roles` plus any `extra` grants.
pub fn permissions_for(roles: &[Role], extra: &[Permission]) -> BTreeSet<Permission> {
    roles
        .iter()
        .flat_map(|role| role.permissions().iter().copied())
        .chain(extra.iter().copied())
        .collect()
}

/// Mapping from a Slack member to an internal identity, as stored in `user_mappings`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMapping {
    pub slack_user_id: String,
    pub internal_user_id: String,
    pub ldap_id: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub roles: Vec<Role>,
    pub permissions: BTreeSet<Permission>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserMapping {
    pub fn new(
        slack_user_id: impl Into<String>,
        internal_user_id: impl Into<String>,
        roles: Vec<Role>,
        extra_permissions: &[Permission],
    ) -> Self {
        let now = Utc::now();
        let permissions = permissions_for(&roles, extra_permissions);
        Self {
            slack_user_id: slack_user_id.into(),
            internal_user_id: internal_user_id.into(),
            ldap_id: None,
            email: None,
            full_name: None,
            roles,
            permissions,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_context(&self) -> UserContext {
        UserContext {
            user_id: self.internal_user_id.clone(),
            slack_user_id: self.slack_user_id.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            ldap_id: self.ldap_id.clone(),
            roles: self.roles.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub slack_user_id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub ldap_id: Option<String>,
    pub roles: Vec<Role>,
    pub permissions: BTreeSet<Permission>,
}

impl UserContext {
    /// Context for a member without a mapping row, keyed by their Slack id.
    pub fn unmapped(slack_user_id: impl Into<String>, role: Role) -> Self {
        let slack_user_id = slack_user_id.into();
        Self {
            user_id: slack_user_id.clone(),
            slack_user_id,
            email: None,
            full_name: None,
            ldap_id: None,
            roles: vec![role],
            permissions: permissions_for(&[role], &[]),
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn require(&self, permission: Permission) -> Result<(), DomainError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(DomainError::PermissionDenied { permission })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{permissions_for, Permission, Role, UserContext, UserMapping};
    use crate::errors::DomainError;

    #[test]
    fn role_table_matches_grants() {
        assert_eq!(Role::Viewer.permissions(), &[Permission::QueryHistory]);
        assert!(Role::Analyst.permissions().contains(&Permission::QueryExecute));
        assert!(!Role::Analyst.permissions().contains(&Permission::UserAdmin));
        assert!(Role::Admin.permissions().contains(&Permission::AuditView));
        assert!(!Role::Admin.permissions().contains(&Permission::SystemAdmin));
        assert_eq!(Role::SuperAdmin.permissions().len(), 6);
    }

    #[test]
    fn permissions_union_roles_and_extras() {
        let granted = permissions_for(&[Role::Viewer], &[Permission::QueryExecute]);
        assert!(granted.contains(&Permission::QueryHistory));
        assert!(granted.contains(&Permission::QueryExecute));
        assert_eq!(granted.len(), 2);
    }

    #[test]
    fn viewer_cannot_execute_queries() {
        let context = UserMapping::new("U1", "alice", vec![Role::Viewer], &[]).to_context();
        assert_eq!(
            context.require(Permission::QueryExecute),
            Err(DomainError::PermissionDenied { permission: Permission::QueryExecute })
        );
        assert!(context.has_role(Role::Viewer));
    }

    #[test]
    fn unmapped_analyst_keys_on_slack_id() {
        let context = UserContext::unmapped("U42", Role::Analyst);
        assert_eq!(context.user_id, "U42");
        assert!(context.require(Permission::QueryExecute).is_ok());
    }

    #[test]
    fn role_names_parse_case_insensitively() {
        assert_eq!("Super_Admin".parse::<Role>(), Ok(Role::SuperAdmin));
        assert!("owner".parse::<Role>().is_err());
        assert_eq!("audit_view".parse::<Permission>(), Ok(Permission::AuditView));
    }
}
