use codeb::configuration::get_configuration;
use codeb::startup::{build_state, run};
use codeb::telemetry::{get_subscriber, init_subscriber};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let subscriber = get_subscriber("codeb".into(), "info".into());
    init_subscriber(subscriber);

    let configuration = get_configuration().expect("Failed to read configuration.");
    let state = build_state(&configuration).expect("Failed to build control plane state.");

    let address = format!("{}:{}", configuration.http_host, configuration.http_port);
    tracing::info!("Start server at {:?}", &address);
    let listener = std::net::TcpListener::bind(&address)
        .unwrap_or_else(|_| panic!("failed to bind to {}", address));

    run(listener, state)?.await
}
