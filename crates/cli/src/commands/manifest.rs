use goosebot_core::manifest::AppManifest;

use crate::commands::CommandResult;

/// Prints the manifest JSON as-is so it can be pasted into the Slack app settings.
pub fn run() -> CommandResult {
    match AppManifest::goosebot().to_json_pretty() {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure(
            "manifest",
            "serialization",
            format!("failed to render manifest: {error}"),
            3,
        ),
    }
}
