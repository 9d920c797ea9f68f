//! Operator commands read from stdin while the engine runs.

use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Per-asset state: in-flight execution, suspension, failure streak.
    Status,
    /// Metrics report.
    Report,
    /// Metrics as JSON.
    Export,
    /// Clears a partial-fill suspension and resumes the asset.
    Acknowledge { asset: String },
    Stop,
    Help,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0} (try `help`)")]
pub struct CommandParseError(pub String);

impl FromStr for EngineCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let command = parts
            .next()
            .ok_or_else(|| CommandParseError("empty command".to_string()))?
            .to_ascii_lowercase();

        let parsed = match command.as_str() {
            "status" => EngineCommand::Status,
            "report" | "metrics" => EngineCommand::Report,
            "export" | "json" => EngineCommand::Export,
            "ack" | "acknowledge" => {
                let asset = parts
                    .next()
                    .ok_or_else(|| CommandParseError("usage: ack <asset>".to_string()))?;
                EngineCommand::Acknowledge {
                    asset: asset.to_string(),
                }
            }
            "stop" | "quit" | "exit" => EngineCommand::Stop,
            "help" | "?" => EngineCommand::Help,
            other => return Err(CommandParseError(format!("unknown command `{}`", other))),
        };

        if let Some(extra) = parts.next() {
            return Err(CommandParseError(format!("unexpected argument `{}`", extra)));
        }
        Ok(parsed)
    }
}

pub const HELP: &str = "commands: status | report | export | ack <asset> | stop";
