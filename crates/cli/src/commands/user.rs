use goosebot_core::config::AppConfig;
use goosebot_core::domain::user::{Role, UserMapping};
use goosebot_db::repositories::{RepositoryError, SqlUserMappingRepository, UserMappingRepository};
use goosebot_db::{connect_from_config, migrations};

use crate::commands::{load_config, runtime, CommandResult};

type Failure = (&'static str, String, u8);

pub fn grant(
    slack_user_id: &str,
    internal_user_id: &str,
    roles: &[String],
    email: Option<String>,
) -> CommandResult {
    let parsed = roles.iter().map(|role| role.parse::<Role>()).collect::<Result<Vec<_>, _>>();
    let roles = match parsed {
        Ok(roles) if !roles.is_empty() => roles,
        Ok(_) => {
            return CommandResult::failure(
                "user.grant",
                "invalid_role",
                "at least one role is required",
                2,
            );
        }
        Err(error) => {
            return CommandResult::failure("user.grant", "invalid_role", error.to_string(), 2);
        }
    };

    let mut mapping = UserMapping::new(slack_user_id, internal_user_id, roles, &[]);
    mapping.email = email;
    let summary = format!(
        "mapped {} to {} with roles [{}]",
        mapping.slack_user_id,
        mapping.internal_user_id,
        mapping.roles.iter().map(|role| role.as_str()).collect::<Vec<_>>().join(", ")
    );

    with_repository("user.grant", |repository| async move {
        repository.save(mapping).await.map_err(repository_failure)?;
        Ok(summary)
    })
}

pub fn list() -> CommandResult {
    with_repository("user.list", |repository| async move {
        let mappings = repository.list().await.map_err(repository_failure)?;
        let active: Vec<String> = mappings
            .iter()
            .filter(|mapping| mapping.is_active)
            .map(|mapping| {
                let roles =
                    mapping.roles.iter().map(|role| role.as_str()).collect::<Vec<_>>().join("|");
                format!("{} -> {} ({roles})", mapping.slack_user_id, mapping.internal_user_id)
            })
            .collect();
        if active.is_empty() {
            return Ok("no active user mappings".to_string());
        }
        Ok(format!("{} active user mappings: {}", active.len(), active.join("; ")))
    })
}

pub fn revoke(slack_user_id: &str) -> CommandResult {
    let slack_user_id = slack_user_id.to_string();
    with_repository("user.revoke", |repository| async move {
        if repository.deactivate(&slack_user_id).await.map_err(repository_failure)? {
            Ok(format!("deactivated mapping for {slack_user_id}"))
        } else {
            Err(("not_found", format!("no mapping for {slack_user_id}"), 6))
        }
    })
}

fn repository_failure(error: RepositoryError) -> Failure {
    ("repository", error.to_string(), 5)
}

/// Connects, applies pending migrations, and hands a mapping repository to `action`.
fn with_repository<F, Fut>(command: &str, action: F) -> CommandResult
where
    F: FnOnce(SqlUserMappingRepository) -> Fut,
    Fut: std::future::Future<Output = Result<String, Failure>>,
{
    let config: AppConfig = match load_config(command) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime(command) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let outcome = action(SqlUserMappingRepository::new(pool.clone())).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(message) => CommandResult::success(command, message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}
