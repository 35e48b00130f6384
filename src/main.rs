use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use marshal::command::{Command, COMMAND_REFERENCE};
use marshal::config::Config;
use marshal::controller::Controller;
use marshal::database::pg_connect;
use marshal::platform::Connector;

/// The controller's entry-point.
///
/// Reads commands line by line from stdin, forwards supervisor
/// milestones into the controller, and logs outgoing events. The
/// upstream chat surface speaks the same command/event contract over
/// whatever transport it prefers.
#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init(); // Use log::* to write to stdout/err

    let config = Config::load();

    let store = pg_connect(&config.postgres_connection)
        .await
        .expect("failed to connect to database");
    store.migrate().await.expect("failed to run migrations");

    let connector = platform_connector();

    let (controller, mut supervisor_events, mut outgoing) =
        Controller::init(config, store, connector).await;

    log::info!("running control loop...");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        tokio::select! {
            event = supervisor_events.recv() => {
                let event = event.expect("supervisor event channel closed");
                controller.on_supervisor_event(event).await;
            }
            event = outgoing.recv() => {
                let event = event.expect("outgoing event channel closed");
                log::info!("event: {:?}", event);
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Some(command) => println!("{}", controller.on_command(command).await),
                    None => println!("{}", COMMAND_REFERENCE),
                }
            }
        }
    }
}

/// The game-client backend the supervisors connect through.
#[cfg(feature = "mock")]
fn platform_connector() -> Arc<dyn Connector> {
    marshal::platform::mock::MockConnector::new()
}

#[cfg(not(feature = "mock"))]
fn platform_connector() -> Arc<dyn Connector> {
    // The platform contract is `platform::Connector`; a deployment
    // links its client library by implementing that trait. Without one
    // (or the `mock` feature) there is nothing to supervise.
    log::error!("this build has no game-client backend; rebuild with a Connector implementation");
    std::process::exit(1)
}
