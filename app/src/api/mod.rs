use actix_web::http::StatusCode;
use actix_web::web::{self, Bytes, Data, Json};
use actix_web::{HttpResponse, HttpResponseBuilder, ResponseError, Scope};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};

use crate::core::error::TimetableError;
use crate::core::status::{StatusSnapshot, TemperatureName};
use crate::timetable::{Day, DayProgram, SharedTimetable, TimetableSettings};

/// Handles shared with the HTTP workers: the timetable for settings
/// reads/writes, the latest snapshot for `/status` and the broadcast feed
/// for `/monitor` streams.
#[derive(Clone)]
pub struct ApiState {
    pub timetable: SharedTimetable,
    pub status: watch::Receiver<StatusSnapshot>,
    pub monitors: broadcast::Sender<StatusSnapshot>,
}

pub fn new_routes(state: ApiState) -> Scope {
    web::scope("")
        .app_data(Data::new(state))
        .route("/version", web::get().to(version))
        .route("/status", web::get().to(status))
        .route("/settings", web::get().to(get_settings))
        .route("/settings", web::post().to(update_settings))
        .route("/monitor", web::get().to(monitor))
        .route("/heating", web::get().to(heating))
        .route("/{info}", web::get().to(info))
}

type ApiResult = Result<HttpResponse, ApiError>;

const CONTENT_TYPE: &str = "application/json; charset=utf-8";

fn json_response(status: StatusCode, body: &impl serde::Serialize) -> HttpResponse {
    HttpResponseBuilder::new(status).content_type(CONTENT_TYPE).json(body)
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{error}")]
    Validation { error: String, explain: Option<String> },
    #[error("the settings are locked by another operation, try again")]
    Busy,
    #[error("there is no `{0}` information")]
    UnknownInfo(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

fn validation(error: impl Into<String>, explain: Option<String>) -> ApiError {
    ApiError::Validation {
        error: error.into(),
        explain,
    }
}

impl From<TimetableError> for ApiError {
    fn from(e: TimetableError) -> Self {
        match e {
            TimetableError::InvalidContent(msg) | TimetableError::InvalidSyntax(msg) => {
                validation("invalid settings", Some(msg))
            }
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Busy => StatusCode::LOCKED,
            ApiError::UnknownInfo(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Internal(e) = self {
            tracing::error!("Control socket internal error: {:?}", e);
        } else {
            tracing::warn!("Control socket request rejected: {}", self);
        }

        let explain = match self {
            ApiError::Validation { explain, .. } => explain.clone(),
            _ => None,
        };

        json_response(
            self.status_code(),
            &json!({
                "error": self.to_string(),
                "explain": explain,
            }),
        )
    }
}

async fn version() -> HttpResponse {
    json_response(StatusCode::OK, &json!({ "version": env!("CARGO_PKG_VERSION") }))
}

async fn status(state: Data<ApiState>) -> HttpResponse {
    json_response(StatusCode::OK, &state.status.borrow().clone())
}

async fn get_settings(state: Data<ApiState>) -> HttpResponse {
    let timetable = state.timetable.lock().await;
    json_response(StatusCode::OK, timetable.settings())
}

/// Partial settings update: the body is a JSON object whose keys are the
/// top-level settings to change (`mode`, `temperatures`, `differential`,
/// `grace_time`, `hvac_mode`, `inertia`, `timetable` with any subset of
/// days, or a whole `settings` document). The update is validated and
/// applied atomically, persisted, and the control cycle is woken up.
async fn update_settings(state: Data<ApiState>, body: Json<Value>) -> ApiResult {
    let updates = body
        .as_object()
        .ok_or_else(|| validation("the request body must be a JSON object", None))?;

    if updates.is_empty() {
        return Err(validation("no settings provided", None));
    }

    let mut timetable = state.timetable.try_lock().map_err(|_| ApiError::Busy)?;

    let mut settings = timetable.settings().clone();
    for (key, value) in updates {
        apply_update(&mut settings, key, value)?;
    }

    timetable.replace(settings)?;
    timetable.save()?;
    drop(timetable);

    state.timetable.notify_changed();

    tracing::info!(
        "Settings updated from the control socket: {:?}",
        updates.keys().collect::<Vec<_>>()
    );

    Ok(json_response(StatusCode::OK, &json!({ "message": "settings updated" })))
}

fn apply_update(settings: &mut TimetableSettings, key: &str, value: &Value) -> Result<(), ApiError> {
    match key {
        "settings" => *settings = parse_field(value, "settings document")?,
        "mode" => settings.mode = parse_field(value, "mode")?,
        "hvac_mode" => settings.hvac_mode = parse_field(value, "hvac mode")?,
        "inertia" => settings.inertia = parse_field(value, "inertia")?,
        "differential" => {
            settings.differential = value
                .as_f64()
                .ok_or_else(|| validation("the differential must be a number", None))?;
        }
        "grace_time" => {
            settings.grace_time = if value.is_null() {
                None
            } else {
                Some(
                    value
                        .as_f64()
                        .ok_or_else(|| validation("the grace time must be a number of seconds or null", None))?,
                )
            };
        }
        "temperatures" => {
            let temperatures = value
                .as_object()
                .ok_or_else(|| validation("the temperatures must be an object", None))?;

            for (name, temperature) in temperatures {
                let name = match name.as_str() {
                    "t0" => TemperatureName::T0,
                    "tmin" => TemperatureName::Tmin,
                    "tmax" => TemperatureName::Tmax,
                    other => return Err(validation(format!("unknown temperature name `{other}`"), None)),
                };

                let degrees = temperature
                    .as_f64()
                    .ok_or_else(|| validation(format!("the {name} temperature must be a number"), None))?;

                match name {
                    TemperatureName::T0 => settings.temperatures.t0 = degrees,
                    TemperatureName::Tmin => settings.temperatures.tmin = degrees,
                    TemperatureName::Tmax => settings.temperatures.tmax = degrees,
                }
            }
        }
        "timetable" => {
            let days = value
                .as_object()
                .ok_or_else(|| validation("the timetable must be an object of days", None))?;

            for (day, program) in days {
                let day = Day::parse(day).ok_or_else(|| validation(format!("invalid day name `{day}`"), None))?;
                let program: DayProgram = parse_field(program, "day program")?;
                settings.timetable.set_day(day, program);
            }
        }
        other => return Err(validation(format!("unknown setting `{other}`"), None)),
    }

    Ok(())
}

fn parse_field<T: serde::de::DeserializeOwned>(value: &Value, what: &str) -> Result<T, ApiError> {
    serde_json::from_value(value.clone()).map_err(|e| validation(format!("invalid {what}"), Some(e.to_string())))
}

#[derive(Debug, Deserialize)]
struct MonitorQuery {
    n: Option<usize>,
}

/// Long-poll monitor: the current snapshot is sent immediately, then the
/// connection streams subsequent cycle snapshots as JSON lines until `n`
/// frames have been delivered. A slow client lags on its own queue and
/// skips frames; it never stalls the cycle.
async fn monitor(state: Data<ApiState>, query: web::Query<MonitorQuery>) -> HttpResponse {
    // the cycle publishes at least every sleep_on_error, so an idle feed
    // this long means the daemon is wedged and the client should let go
    const IDLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

    let frames = query.n.unwrap_or(1).max(1);

    struct MonitorStream {
        rx: broadcast::Receiver<StatusSnapshot>,
        pending: Option<StatusSnapshot>,
        remaining: usize,
    }

    let stream = futures::stream::unfold(
        MonitorStream {
            rx: state.monitors.subscribe(),
            pending: Some(state.status.borrow().clone()),
            remaining: frames,
        },
        |mut stream| async move {
            if stream.remaining == 0 {
                return None;
            }

            let frame = match stream.pending.take() {
                Some(first) => first,
                None => loop {
                    match tokio::time::timeout(IDLE_TIMEOUT, stream.rx.recv()).await {
                        Ok(Ok(frame)) => break frame,
                        Ok(Err(broadcast::error::RecvError::Lagged(missed))) => {
                            tracing::debug!("A monitor lagged behind and skipped {} snapshots", missed);
                        }
                        Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                        Err(_) => {
                            tracing::debug!("Closing an idle monitor connection");
                            return None;
                        }
                    }
                },
            };

            stream.remaining -= 1;

            let mut line = serde_json::to_vec(&frame).ok()?;
            line.push(b'\n');

            Some((Ok::<_, std::convert::Infallible>(Bytes::from(line)), stream))
        },
    );

    HttpResponse::Ok()
        .content_type("application/json; charset=utf-8")
        .streaming(stream)
}

async fn heating(state: Data<ApiState>) -> HttpResponse {
    let snapshot = state.status.borrow().clone();
    json_response(
        StatusCode::OK,
        &json!({ "status": snapshot.status, "timestamp": snapshot.timestamp }),
    )
}

/// Bag-of-info passthrough for simple clients: `/{info}` answers with the
/// same payload as the matching dedicated endpoint.
async fn info(state: Data<ApiState>, path: web::Path<String>) -> ApiResult {
    let payload = match path.as_str() {
        "version" => json!({ "version": env!("CARGO_PKG_VERSION") }),
        "status" => serde_json::to_value(state.status.borrow().clone()).map_err(anyhow::Error::new)?,
        "settings" => {
            let timetable = state.timetable.lock().await;
            serde_json::to_value(timetable.settings().clone()).map_err(anyhow::Error::new)?
        }
        "heating" => {
            let snapshot = state.status.borrow().clone();
            json!({ "status": snapshot.status, "timestamp": snapshot.timestamp })
        }
        other => return Err(ApiError::UnknownInfo(other.to_owned())),
    };

    Ok(json_response(StatusCode::OK, &payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test};

    use crate::core::status::{HvacMode, Inertia, Mode};
    use crate::timetable::{Cell, NamedTemperatures, Timetable, WeeklyProgram};

    fn test_state() -> ApiState {
        let settings = TimetableSettings {
            temperatures: NamedTemperatures {
                t0: 5.0,
                tmin: 18.0,
                tmax: 21.0,
            },
            differential: 0.5,
            grace_time: None,
            mode: Mode::Auto,
            hvac_mode: HvacMode::Heating,
            inertia: Inertia::Low,
            timetable: WeeklyProgram::uniform(Cell::Named(TemperatureName::Tmin)),
        };

        let path = std::env::temp_dir().join(format!("hearth-api-{}.json", std::process::id()));
        let timetable = Timetable::new(settings, path).unwrap();

        let (_, status_rx) = watch::channel(StatusSnapshot::new(
            Mode::Auto,
            HvacMode::Heating,
            false,
            Some(crate::core::unit::Degrees(19.5)),
            Some(crate::core::unit::Degrees(18.0)),
        ));
        let (monitor_tx, _) = broadcast::channel(16);

        ApiState {
            timetable: SharedTimetable::new(timetable),
            status: status_rx,
            monitors: monitor_tx,
        }
    }

    #[actix_web::test]
    async fn test_version_endpoint() {
        let app = test::init_service(App::new().service(new_routes(test_state()))).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/version").to_request()).await;
        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "application/json; charset=utf-8"
        );

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[actix_web::test]
    async fn test_status_endpoint_returns_latest_snapshot() {
        let app = test::init_service(App::new().service(new_routes(test_state()))).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/status").to_request()).await;
        let body: Value = test::read_body_json(resp).await;

        assert_eq!(body["current_temperature"], 19.5);
        assert_eq!(body["status"], 0);
    }

    #[actix_web::test]
    async fn test_update_mode() {
        let state = test_state();
        let timetable = state.timetable.clone();

        let app = test::init_service(App::new().service(new_routes(state))).await;

        let req = test::TestRequest::post()
            .uri("/settings")
            .set_json(json!({"mode": "off"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        assert_eq!(timetable.lock().await.mode(), Mode::Off);
    }

    #[actix_web::test]
    async fn test_update_rejects_invalid_values() {
        let app = test::init_service(App::new().service(new_routes(test_state()))).await;

        for body in [
            json!({"mode": "tepid"}),
            json!({"differential": 7.0}),
            json!({"whatever": 1}),
            json!({}),
            json!({"temperatures": {"tluke": 20}}),
        ] {
            let req = test::TestRequest::post().uri("/settings").set_json(body).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

            let body: Value = test::read_body_json(resp).await;
            assert!(body["error"].is_string());
        }
    }

    #[actix_web::test]
    async fn test_update_single_day() {
        let state = test_state();
        let timetable = state.timetable.clone();

        let app = test::init_service(App::new().service(new_routes(state))).await;

        let mut day = serde_json::Map::new();
        for h in 0..24 {
            day.insert(format!("h{h:02}"), json!(["t0", "t0", "t0", "t0"]));
        }

        let req = test::TestRequest::post()
            .uri("/settings")
            .set_json(json!({"timetable": {"monday": day}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let tt = timetable.lock().await;
        assert_eq!(tt.settings().timetable.cell(Day::Monday, 10, 0), Cell::Named(TemperatureName::T0));
        assert_eq!(
            tt.settings().timetable.cell(Day::Tuesday, 10, 0),
            Cell::Named(TemperatureName::Tmin)
        );
    }

    #[actix_web::test]
    async fn test_busy_timetable_returns_locked() {
        let state = test_state();
        let guard = state.timetable.try_lock().unwrap();

        let app = test::init_service(App::new().service(new_routes(state.clone()))).await;

        let req = test::TestRequest::post()
            .uri("/settings")
            .set_json(json!({"mode": "auto"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::LOCKED);

        drop(guard);
    }

    #[actix_web::test]
    async fn test_monitor_sends_snapshot_on_connect() {
        let app = test::init_service(App::new().service(new_routes(test_state()))).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/monitor?n=1").to_request()).await;
        assert!(resp.status().is_success());

        let body = test::read_body(resp).await;
        let line: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(line["current_temperature"], 19.5);
    }

    #[actix_web::test]
    async fn test_info_passthrough() {
        let app = test::init_service(App::new().service(new_routes(test_state()))).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/heating").to_request()).await;
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], 0);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/nonsense").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
