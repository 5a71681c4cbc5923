use std::time::Duration;

use crate::core::error::{ScriptError, ThermometerError};
use crate::core::script::{self, CommandLine};
use crate::core::unit::Degrees;

/// Temperature source backed by a user-supplied helper script.
///
/// The script must exit with status 0 on success and print to stdout a JSON
/// document `{"temperature": <num>, "error": <str|null>}`; on failure the
/// exit status is non-zero and the `error` field carries the diagnosis.
pub struct ScriptSensor {
    argv: Vec<String>,
    timeout: Duration,
}

impl ScriptSensor {
    pub fn new(command: &CommandLine, debug: bool, timeout: Duration) -> Result<Self, ScriptError> {
        let argv = command.to_argv(debug);
        script::check_executable(&argv)?;

        tracing::debug!("Thermometer script initialized: `{}`", argv.join(" "));

        Ok(Self { argv, timeout })
    }

    pub async fn read(&mut self) -> Result<Degrees, ThermometerError> {
        let out = script::run(&self.argv, self.timeout).await.map_err(ThermometerError::from)?;
        let script = &self.argv[0];

        if !out.success {
            let suberr = "the thermometer script exited with a non-zero status";
            let err = out.reported_error().unwrap_or_else(|| suberr.to_owned());
            return Err(ThermometerError::from(ScriptError::new(script, err)));
        }

        let json = out.json.ok_or_else(|| {
            ThermometerError::from(ScriptError::new(
                script,
                "script output is invalid, cannot get current temperature",
            ))
        })?;

        let temperature = json
            .get("temperature")
            .and_then(|t| t.as_f64())
            .filter(|t| t.is_finite())
            .ok_or_else(|| {
                ThermometerError::from(ScriptError::new(
                    script,
                    "the thermometer script has not returned the current temperature",
                ))
            })?;

        tracing::debug!("Current temperature from script is {:.2}", temperature);

        Ok(Degrees(temperature))
    }
}
