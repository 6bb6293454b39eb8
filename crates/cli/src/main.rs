use std::process::ExitCode;

fn main() -> ExitCode {
    goosebot_cli::run()
}
