use std::path::PathBuf;

/// POSIX exit codes of the daemon. Grouped by failure stage: configuration
/// (10-19), object initialization (20-29), control socket (30-39), runtime
/// (40-59), shutdown (60-69).
pub mod exit {
    pub const OK: u8 = 0;
    pub const DAEMON_DISABLED: u8 = 6;

    pub const CFG_FILE_MISSING: u8 = 10;
    pub const CFG_FILE_SYNTAX: u8 = 11;
    pub const CFG_FILE_INVALID: u8 = 12;
    pub const CFG_FILE_UNKNOWN: u8 = 13;

    pub const TIMETABLE_NOT_FOUND: u8 = 20;
    pub const TIMETABLE_READ: u8 = 21;
    pub const TIMETABLE_SYNTAX: u8 = 22;
    pub const TIMETABLE_CONTENT: u8 = 23;
    pub const SCRIPT_INIT: u8 = 26;
    pub const INIT_OTHER: u8 = 29;

    pub const SOCKET_START: u8 = 31;

    pub const RUN_INVALID_STATE: u8 = 50;
    pub const RUN_UNKNOWN: u8 = 59;

    pub const SHUTDOWN_SWITCH_OFF: u8 = 60;

    pub const KEYBOARD_INTERRUPT: u8 = 130;
}

/// Malformed or missing configuration, raised at startup only.
#[derive(Debug, thiserror::Error)]
#[error("configuration error: {0}")]
pub struct ConfigError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum TimetableError {
    #[error("timetable file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("cannot read timetable file: {}", .0.display())]
    PermissionDenied(PathBuf),
    #[error("timetable is not valid JSON: {0}")]
    InvalidSyntax(String),
    #[error("invalid timetable content: {0}")]
    InvalidContent(String),
    #[error("error accessing timetable file: {0}")]
    Io(#[from] std::io::Error),
}

impl TimetableError {
    pub fn exit_code(&self) -> u8 {
        match self {
            TimetableError::NotFound(_) => exit::TIMETABLE_NOT_FOUND,
            TimetableError::PermissionDenied(_) | TimetableError::Io(_) => exit::TIMETABLE_READ,
            TimetableError::InvalidSyntax(_) => exit::TIMETABLE_SYNTAX,
            TimetableError::InvalidContent(_) => exit::TIMETABLE_CONTENT,
        }
    }
}

/// A failing external helper. The script path is carried for diagnostics
/// but never printed by the wrapping error's `Display`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct ScriptError {
    pub script: String,
    pub error: String,
}

impl ScriptError {
    pub fn new(script: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            error: error.into(),
        }
    }
}

/// Transient thermometer failure: logged, reflected in the status snapshot,
/// retried on the next cycle.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ThermometerError {
    error: String,
    suberror: Option<String>,
}

impl ThermometerError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            suberror: None,
        }
    }

    pub fn with_sub(error: impl Into<String>, suberror: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            suberror: Some(suberror.into()),
        }
    }

    pub fn suberror(&self) -> Option<&str> {
        self.suberror.as_deref()
    }
}

impl From<ScriptError> for ThermometerError {
    fn from(e: ScriptError) -> Self {
        ThermometerError::with_sub(e.error, format!("reported by script `{}`", e.script))
    }
}

/// Transient actuator failure, same policy as [`ThermometerError`].
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct HeatingError {
    error: String,
    suberror: Option<String>,
}

impl HeatingError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            suberror: None,
        }
    }

    pub fn with_sub(error: impl Into<String>, suberror: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            suberror: Some(suberror.into()),
        }
    }

    pub fn suberror(&self) -> Option<&str> {
        self.suberror.as_deref()
    }
}

impl From<ScriptError> for HeatingError {
    fn from(e: ScriptError) -> Self {
        HeatingError::with_sub(e.error, format!("reported by script `{}`", e.script))
    }
}
