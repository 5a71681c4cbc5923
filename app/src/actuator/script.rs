use std::time::Duration;

use crate::core::error::{HeatingError, ScriptError};
use crate::core::script::{self, CommandLine, ScriptOutput};

/// Actuator driven by external helper commands: one to switch on, one to
/// switch off and an optional one to query the current status.
///
/// Each script must exit with status 0 on success and print a JSON document
/// `{"success": bool, "error": str|null}` to stdout; the status script
/// additionally reports `{"status": 0|1}`. Without a status script the
/// cached state is authoritative, so at startup one explicit switch-off is
/// issued to reach a known state.
pub struct ScriptActuator {
    switch_on_argv: Vec<String>,
    switch_off_argv: Vec<String>,
    status_argv: Option<Vec<String>>,
    cached_on: bool,
    timeout: Duration,
}

impl ScriptActuator {
    pub fn new(
        switch_on: &CommandLine,
        switch_off: &CommandLine,
        status: Option<&CommandLine>,
        debug: bool,
        timeout: Duration,
    ) -> Result<Self, ScriptError> {
        let switch_on_argv = switch_on.to_argv(debug);
        let switch_off_argv = switch_off.to_argv(debug);
        let status_argv = status.map(|s| s.to_argv(debug));

        script::check_executable(&switch_on_argv)?;
        script::check_executable(&switch_off_argv)?;
        if let Some(argv) = &status_argv {
            script::check_executable(argv)?;
        }

        tracing::debug!(
            "Actuator scripts initialized: ON=`{}`, OFF=`{}`, STATUS=`{}`",
            switch_on_argv[0],
            switch_off_argv[0],
            status_argv.as_ref().map(|a| a[0].as_str()).unwrap_or("<none>")
        );

        Ok(Self {
            switch_on_argv,
            switch_off_argv,
            status_argv,
            cached_on: false,
            timeout,
        })
    }

    /// Learn the initial state: from the status script when there is one,
    /// otherwise by forcing the actuator off.
    pub async fn init(&mut self) -> Result<(), HeatingError> {
        if self.status_argv.is_some() {
            self.status().await?;
        } else {
            self.switch_off().await?;
        }
        Ok(())
    }

    async fn run_switch(&self, argv: &[String], action: &str) -> Result<(), HeatingError> {
        let out = script::run(argv, self.timeout).await.map_err(HeatingError::from)?;

        if !out.success {
            return Err(script_failure(&argv[0], action, &out));
        }

        Ok(())
    }

    pub async fn switch_on(&mut self) -> Result<(), HeatingError> {
        tracing::debug!("Switching on through `{}`", self.switch_on_argv[0]);
        self.run_switch(&self.switch_on_argv.clone(), "switch-on").await?;
        self.cached_on = true;
        Ok(())
    }

    pub async fn switch_off(&mut self) -> Result<(), HeatingError> {
        tracing::debug!("Switching off through `{}`", self.switch_off_argv[0]);
        self.run_switch(&self.switch_off_argv.clone(), "switch-off").await?;
        self.cached_on = false;
        Ok(())
    }

    pub async fn status(&mut self) -> Result<bool, HeatingError> {
        let Some(argv) = self.status_argv.clone() else {
            return Ok(self.cached_on);
        };

        let out = script::run(&argv, self.timeout).await.map_err(HeatingError::from)?;

        if !out.success {
            return Err(script_failure(&argv[0], "status", &out));
        }

        let status = out
            .json
            .as_ref()
            .and_then(|json| json.get("status"))
            .and_then(|s| match s {
                serde_json::Value::Bool(b) => Some(*b),
                serde_json::Value::Number(n) => n.as_i64().map(|n| n != 0),
                _ => None,
            })
            .ok_or_else(|| {
                HeatingError::from(ScriptError::new(
                    &argv[0],
                    "the status script has not returned the current status",
                ))
            })?;

        self.cached_on = status;
        Ok(status)
    }

    pub fn is_on(&self) -> bool {
        self.cached_on
    }
}

fn script_failure(script: &str, action: &str, out: &ScriptOutput) -> HeatingError {
    let fallback = format!("the {action} script exited with a non-zero status");
    let err = out.reported_error().unwrap_or(fallback);
    HeatingError::from(ScriptError::new(script, format!("{action}: {err}")))
}
