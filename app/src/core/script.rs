use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;

use super::error::ScriptError;

const DEBUG_OPTION: &str = "--debug";

/// An external helper command, configured either as a single line (split on
/// whitespace) or as an explicit argv array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Argv(Vec<String>),
    Line(String),
}

impl CommandLine {
    /// Resolve to an argv, appending `--debug` when the daemon runs in
    /// debug mode so helpers can raise their own verbosity.
    pub fn to_argv(&self, debug: bool) -> Vec<String> {
        let mut argv = match self {
            CommandLine::Argv(argv) => argv.clone(),
            CommandLine::Line(line) => line.split_whitespace().map(str::to_owned).collect(),
        };

        if debug {
            argv.push(DEBUG_OPTION.to_owned());
        }

        argv
    }
}

/// Check existence and executability of the program of `argv`.
pub fn check_executable(argv: &[String]) -> Result<(), ScriptError> {
    let program = argv.first().ok_or_else(|| ScriptError::new("", "empty command line"))?;

    let metadata = std::fs::metadata(program).map_err(|_| ScriptError::new(program, "file not found"))?;

    if !metadata.is_file() {
        return Err(ScriptError::new(program, "not a regular file"));
    }

    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(ScriptError::new(program, "script not executable"));
    }

    Ok(())
}

#[derive(Debug)]
pub struct ScriptOutput {
    /// Whether the script exited with status 0, the primary success signal.
    pub success: bool,
    /// The JSON document the script wrote to stdout, if parseable.
    pub json: Option<serde_json::Value>,
}

impl ScriptOutput {
    /// The `error` field of the script's JSON output, if any.
    pub fn reported_error(&self) -> Option<String> {
        self.json
            .as_ref()
            .and_then(|json| json.get("error"))
            .and_then(|e| e.as_str())
            .filter(|e| !e.is_empty())
            .map(str::to_owned)
    }
}

/// Execute `argv` and capture its stdout as JSON. Spawn failures and
/// timeouts are [`ScriptError`]s; a non-zero exit status is reported
/// through [`ScriptOutput::success`] so callers can still read the
/// script's own diagnosis.
pub async fn run(argv: &[String], timeout: Duration) -> Result<ScriptOutput, ScriptError> {
    let program = argv.first().ok_or_else(|| ScriptError::new("", "empty command line"))?;

    let output = Command::new(program).args(&argv[1..]).kill_on_drop(true).output();

    let output = tokio::time::timeout(timeout, output)
        .await
        .map_err(|_| ScriptError::new(program, format!("script timed out after {}s", timeout.as_secs())))?
        .map_err(|e| ScriptError::new(program, format!("cannot execute script: {e}")))?;

    let json = serde_json::from_slice(&output.stdout).ok();

    Ok(ScriptOutput {
        success: output.status.success(),
        json,
    })
}
