use std::net::TcpListener;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use tracing_actix_web::TracingLogger;

use crate::configuration::Settings;
use crate::engine::SlotEngine;
use crate::envstore::EnvStore;
use crate::errors::Result;
use crate::events::EventBus;
use crate::helpers::ssh::{RemoteExecutor, SshExecutor};
use crate::models::HostMap;
use crate::registry::SlotRegistryStore;

/// Shared state handed to every request handler.
pub struct AppState {
    pub engine: Arc<SlotEngine>,
    pub envs: Arc<EnvStore>,
}

/// Wire the full stack from settings. Must run inside a tokio runtime: the
/// event-bus worker is spawned here.
pub fn build_state(settings: &Settings) -> Result<AppState> {
    let executor: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::from_settings(
        &settings.ssh,
        settings.default_command_timeout,
    )?);
    Ok(build_state_with_executor(settings, executor))
}

/// Same wiring with an injected executor; integration tests use this to run
/// the engine against an in-memory host fake.
pub fn build_state_with_executor(
    settings: &Settings,
    executor: Arc<dyn RemoteExecutor>,
) -> AppState {
    let hosts = HostMap::new(&settings.hosts);
    let registry = Arc::new(SlotRegistryStore::new(executor.clone(), hosts.clone()));
    let envs = Arc::new(EnvStore::new(executor.clone(), hosts.clone()));
    let events = EventBus::start(settings.event_bus.clone());
    let engine = Arc::new(SlotEngine::new(
        executor,
        hosts,
        registry,
        events,
        settings.grace_period,
        settings.default_health_timeout,
    ));

    AppState { engine, envs }
}

pub fn run(listener: TcpListener, state: AppState) -> std::io::Result<Server> {
    let state = web::Data::new(state);
    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Cors::permissive())
            .service(
                web::resource("/health_check").route(web::get().to(crate::routes::health_check)),
            )
            .service(web::resource("/tools").route(web::post().to(crate::routes::tools)))
            .app_data(state.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
