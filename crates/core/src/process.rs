//! Process roles and the Procfile that maps hosting process types onto them.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SERVER_BINARY: &str = "goosebot-server";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRole {
    /// Socket Mode bot plus its health server.
    Slackbot,
    /// Query Expert bridge.
    Mcp,
}

impl ProcessRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Slackbot => "slackbot",
            Self::Mcp => "mcp",
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown app role `{0}` (expected slackbot|mcp)")]
pub struct UnknownRole(pub String);

impl FromStr for ProcessRole {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "slackbot" => Ok(Self::Slackbot),
            "mcp" => Ok(Self::Mcp),
            _ => Err(UnknownRole(value.trim().to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcfileError {
    #[error("could not read Procfile `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("line {line}: expected `<type>: <command>`")]
    MissingSeparator { line: usize },
    #[error("line {line}: process type `{process_type}` must match [A-Za-z0-9_-]+")]
    InvalidProcessType { line: usize, process_type: String },
    #[error("line {line}: process type `{process_type}` has an empty command")]
    EmptyCommand { line: usize, process_type: String },
    #[error("line {line}: process type `{process_type}` is declared more than once")]
    DuplicateProcessType { line: usize, process_type: String },
    #[error("Procfile has no `web` process; the hosting platform routes HTTP only to `web`")]
    MissingWebProcess,
    #[error("process type `{process_type}`: {source}")]
    Role { process_type: String, source: UnknownRole },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProcfileEntry {
    pub process_type: String,
    pub command: String,
}

impl ProcfileEntry {
    /// Role the command would start, read from `--role`, `GOOSEBOT_APP_ROLE=` or `APP_TYPE=`.
    pub fn role(&self) -> Result<ProcessRole, UnknownRole> {
        let mut tokens = self.command.split_whitespace();
        while let Some(token) = tokens.next() {
            let explicit = if token == "--role" {
                tokens.next()
            } else {
                token
                    .strip_prefix("--role=")
                    .or_else(|| token.strip_prefix("GOOSEBOT_APP_ROLE="))
                    .or_else(|| token.strip_prefix("APP_TYPE="))
            };

            if let Some(value) = explicit {
                return value.parse();
            }
        }

        Ok(ProcessRole::Slackbot)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Procfile {
    entries: Vec<ProcfileEntry>,
}

impl Procfile {
    pub fn load(path: &Path) -> Result<Self, ProcfileError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| ProcfileError::Read { path: path.to_path_buf(), source })?;
        Self::parse(&raw)
    }

    pub fn parse(input: &str) -> Result<Self, ProcfileError> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        for (index, raw_line) in input.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (process_type, command) =
                trimmed.split_once(':').ok_or(ProcfileError::MissingSeparator { line })?;
            let process_type = process_type.trim();
            let command = command.trim();

            if !is_valid_process_type(process_type) {
                return Err(ProcfileError::InvalidProcessType {
                    line,
                    process_type: process_type.to_string(),
                });
            }
            if command.is_empty() {
                return Err(ProcfileError::EmptyCommand {
                    line,
                    process_type: process_type.to_string(),
                });
            }
            if !seen.insert(process_type.to_string()) {
                return Err(ProcfileError::DuplicateProcessType {
                    line,
                    process_type: process_type.to_string(),
                });
            }

            entries.push(ProcfileEntry {
                process_type: process_type.to_string(),
                command: command.to_string(),
            });
        }

        Ok(Self { entries })
    }

    /// `web` runs the bot (and answers the platform's HTTP checks); `worker` runs the bridge.
    pub fn recommended() -> Self {
        Self {
            entries: vec![
                ProcfileEntry {
                    process_type: "web".to_string(),
                    command: SERVER_BINARY.to_string(),
                },
                ProcfileEntry {
                    process_type: "worker".to_string(),
                    command: format!("{SERVER_BINARY} --role mcp"),
                },
            ],
        }
    }

    pub fn entries(&self) -> &[ProcfileEntry] {
        &self.entries
    }

    pub fn get(&self, process_type: &str) -> Option<&ProcfileEntry> {
        self.entries.iter().find(|entry| entry.process_type == process_type)
    }

    pub fn validate_for_web(&self) -> Result<&ProcfileEntry, ProcfileError> {
        self.get("web").ok_or(ProcfileError::MissingWebProcess)
    }

    /// Resolves every entry to the role it launches.
    pub fn roles(&self) -> Result<Vec<(&ProcfileEntry, ProcessRole)>, ProcfileError> {
        self.entries
            .iter()
            .map(|entry| {
                entry.role().map(|role| (entry, role)).map_err(|source| ProcfileError::Role {
                    process_type: entry.process_type.clone(),
                    source,
                })
            })
            .collect()
    }
}

impl fmt::Display for Procfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}: {}", entry.process_type, entry.command)?;
        }
        Ok(())
    }
}

fn is_valid_process_type(value: &str) -> bool {
    !value.is_empty()
        && value.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}
