use actix_web::{App, HttpServer, Scope};
use anyhow::Context as _;
use serde::Deserialize;
use tracing_actix_web::TracingLogger;

#[derive(Debug, Deserialize, Clone)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
}

impl HttpServerConfig {
    /// Bind the configured address and serve the given top-level scopes
    /// until the surrounding task is dropped.
    ///
    /// Signal handling is disabled here: the daemon owns the signals and
    /// tears the whole process down as one unit.
    pub async fn run_server<F>(&self, scopes: F) -> anyhow::Result<()>
    where
        F: Fn() -> Vec<Scope> + Send + Clone + 'static,
    {
        let server = HttpServer::new(move || {
            scopes()
                .into_iter()
                .fold(App::new().wrap(TracingLogger::default()), |app, scope| app.service(scope))
        })
        .workers(1)
        .disable_signals()
        .bind((self.host.as_str(), self.port))
        .with_context(|| format!("cannot bind the control socket to {}:{}", self.host, self.port))?;

        server.run().await.context("the control socket stopped unexpectedly")
    }
}
