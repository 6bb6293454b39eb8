use std::path::Path;

use goosebot_core::Procfile;

use crate::commands::CommandResult;

pub fn run(path: Option<&Path>) -> CommandResult {
    let Some(path) = path else {
        return CommandResult { exit_code: 0, output: Procfile::recommended().to_string() };
    };

    let procfile = match Procfile::load(path) {
        Ok(procfile) => procfile,
        Err(error) => {
            return CommandResult::failure("procfile", "procfile_parse", error.to_string(), 2);
        }
    };
    if let Err(error) = procfile.validate_for_web() {
        return CommandResult::failure("procfile", "procfile_web", error.to_string(), 2);
    }

    match procfile.roles() {
        Ok(roles) => {
            let summary = roles
                .iter()
                .map(|(entry, role)| format!("{} -> {role}", entry.process_type))
                .collect::<Vec<_>>()
                .join(", ");
            CommandResult::success("procfile", format!("{}: {summary}", path.display()))
        }
        Err(error) => CommandResult::failure("procfile", "procfile_role", error.to_string(), 2),
    }
}
