use anyhow::{Context, Result};
use mapcore::config::ServerConfig;
use mapcore::core::{spawn_console_reader, ConsoleQueue};
use mapcore::servers::map::{assemble_world, forward_signals, load_world_data, MapServer};
use mapcore::timer::SystemClock;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/map_server.yaml".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: map_server [--conf FILE]");
                return Ok(());
            }
            "--conf" if i + 1 < args.len() => {
                i += 1;
                conf_file = args[i].clone();
            }
            other => tracing::warn!("[map] ignoring argument `{other}`"),
        }
        i += 1;
    }

    let config = ServerConfig::from_file(&conf_file).with_context(|| format!("Cannot load config: {conf_file}"))?;

    tracing::info!("[map] Map Server Started.");

    let data = load_world_data(&config).await.context("Cannot load world data")?;
    let world = assemble_world(&config, data, SystemClock::new())?;

    let console = ConsoleQueue::new();
    spawn_console_reader(console.clone()).context("Cannot start console reader")?;
    forward_signals(console.clone());

    let mut server = MapServer::new(world, console);
    server.state.set_term_func(|| tracing::info!("[map] world released"));
    server.run().await
}
