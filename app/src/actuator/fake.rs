use crate::core::error::HeatingError;

/// In-memory actuator for running without hardware and for tests. Can be
/// primed to fail the next operation to exercise error paths.
#[derive(Debug, Default)]
pub struct FakeActuator {
    on: bool,
    fail_with: Option<String>,
    #[cfg(test)]
    panic_next: bool,
}

impl FakeActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next operation fail with `error`.
    pub fn fail_next(&mut self, error: impl Into<String>) {
        self.fail_with = Some(error.into());
    }

    /// Make the next operation panic, to exercise the unknown-error path
    /// of the control cycle.
    #[cfg(test)]
    pub fn panic_next(&mut self) {
        self.panic_next = true;
    }

    fn check_failure(&mut self) -> Result<(), HeatingError> {
        #[cfg(test)]
        if self.panic_next {
            panic!("actuator driver bug");
        }

        match self.fail_with.take() {
            Some(error) => Err(HeatingError::new(error)),
            None => Ok(()),
        }
    }

    pub fn switch_on(&mut self) -> Result<(), HeatingError> {
        self.check_failure()?;
        self.on = true;
        Ok(())
    }

    pub fn switch_off(&mut self) -> Result<(), HeatingError> {
        self.check_failure()?;
        self.on = false;
        Ok(())
    }

    pub fn status(&mut self) -> Result<bool, HeatingError> {
        self.check_failure()?;
        Ok(self.on)
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}
