use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{error, info};

use hearth::api::{self, ApiState};
use hearth::core::error::exit;
use hearth::core::status::StatusSnapshot;
use hearth::cycle::{ControlCycle, DaemonContext, handle_signals};
use hearth::settings::Settings;
use hearth::timetable::{SharedTimetable, Timetable};

// Queue depth of each monitor's snapshot feed; a client lagging further
// behind starts skipping frames.
const MONITOR_QUEUE: usize = 16;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error reading configuration: {e}");
            return ExitCode::from(config_exit_code(&e));
        }
    };

    let logs = match settings.monitoring.init(settings.daemon.debug) {
        Ok(handle) => Arc::new(handle),
        Err(e) => {
            eprintln!("Error initializing logging: {e}");
            return ExitCode::from(exit::CFG_FILE_INVALID);
        }
    };

    if !settings.daemon.enabled {
        info!("Daemon disabled in configuration file, exiting");
        return ExitCode::from(exit::DAEMON_DISABLED);
    }

    if let Err(e) = settings.validate() {
        error!("{}", e);
        return ExitCode::from(exit::CFG_FILE_INVALID);
    }

    let timetable = match Timetable::load(&settings.daemon.timetable) {
        Ok(timetable) => SharedTimetable::new(timetable),
        Err(e) => {
            error!("Cannot load the timetable: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    let thermometer = match settings.thermometer.build(&settings.daemon) {
        Ok(thermometer) => thermometer,
        Err(e) => {
            error!("Cannot initialize the thermometer: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    let mut actuator = match settings.actuator.build(&settings.daemon) {
        Ok(actuator) => actuator,
        Err(e) => {
            error!("Cannot initialize the actuator: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    if let Err(e) = actuator.init().await {
        error!("Cannot bring the actuator to a known state: {}", e);
        return ExitCode::from(exit::INIT_OTHER);
    }

    let ctx = DaemonContext::new();

    let initial_status = {
        let tt = timetable.lock().await;
        let s = tt.settings();
        StatusSnapshot::new(s.mode, s.hvac_mode, actuator.is_on(), None, None)
    };

    let (status_tx, status_rx) = watch::channel(initial_status);
    let (monitor_tx, _) = broadcast::channel(MONITOR_QUEUE);

    let api_state = ApiState {
        timetable: timetable.clone(),
        status: status_rx,
        monitors: monitor_tx.clone(),
    };

    let server = tokio::spawn({
        let socket = settings.socket.clone();
        let ctx = ctx.clone();

        async move {
            let result = socket.run_server(move || vec![api::new_routes(api_state.clone())]).await;

            if let Err(e) = result {
                error!("Control socket failed: {:?}", e);
                ctx.shutdown(exit::SOCKET_START);
            }
        }
    });

    let signals = tokio::spawn({
        let ctx = ctx.clone();
        let timetable = timetable.clone();
        let logs = logs.clone();

        async move {
            if let Err(e) = handle_signals(ctx.clone(), timetable, logs).await {
                error!("Cannot install signal handlers: {}", e);
                ctx.shutdown(exit::INIT_OTHER);
            }
        }
    });

    let cycle = ControlCycle::new(
        timetable,
        thermometer,
        actuator,
        ctx.clone(),
        settings.daemon.interval(),
        settings.daemon.sleep_on_error(),
        status_tx,
        monitor_tx,
    );

    // the cycle owns the shutdown sequence and returns once disabled
    cycle.run().await;

    server.abort();
    signals.abort();

    info!("Closing daemon with return code {}", ctx.exit_code());
    ExitCode::from(ctx.exit_code())
}

fn config_exit_code(e: &config::ConfigError) -> u8 {
    match e {
        config::ConfigError::NotFound(_) | config::ConfigError::Foreign(_) => exit::CFG_FILE_MISSING,
        config::ConfigError::FileParse { .. } => exit::CFG_FILE_SYNTAX,
        config::ConfigError::Type { .. } | config::ConfigError::Message(_) => exit::CFG_FILE_INVALID,
        _ => exit::CFG_FILE_UNKNOWN,
    }
}
