use crate::commands::{load_config, runtime, CommandResult};
use goosebot_db::{connect_from_config, ping};

/// Preflight for `goosebot-server`: the config validates for the selected role and the
/// database answers.
pub fn run() -> CommandResult {
    let config = match load_config("start") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("start") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database).await?;
        let pinged = ping(&pool).await;
        pool.close().await;
        pinged
    });

    match result {
        Ok(()) => CommandResult::success(
            "start",
            format!(
                "preflight passed for role `{}`; run `goosebot-server` to start serving on {}:{}",
                config.app.role, config.server.bind_address, config.server.port
            ),
        ),
        Err(error) => CommandResult::failure(
            "start",
            "db_connectivity",
            format!("failed to connect to database: {error}"),
            4,
        ),
    }
}

