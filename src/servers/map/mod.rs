//! The map-server process loop.
//!
//! Startup loads every data source into a fresh [`MapWorld`]; the loop then
//! alternates between pumping due timers and sleeping until the next one,
//! waking early when a console line (or a shutdown signal, which is queued
//! as a console line) arrives. The world never leaves the loop's thread.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::{DataSource, ServerConfig};
use crate::core::{format_uptime, ConsoleCommand, ConsoleQueue, ServerState, Signal};
use crate::database::{self, map_db, mob_db};
use crate::game::map::EntityDirectory;
use crate::game::mob::guardian::Castle;
use crate::game::mob::spawn::{self, SpawnData};
use crate::game::world::{MapWorld, MapWorldBuilder};
use crate::database::mob_db::MobTemplate;
use crate::timer::TickSource;

/// Everything read from disk or MySQL before the world is built.
pub struct WorldData {
    pub templates: HashMap<u32, Arc<MobTemplate>>,
    pub spawns: Vec<SpawnData>,
    pub directory: EntityDirectory,
    pub castles: Vec<Castle>,
}

/// Read templates, spawn lines, maps and castles from the configured source.
pub async fn load_world_data(config: &ServerConfig) -> Result<WorldData> {
    let maps_dir = Path::new(&config.maps_dir);
    let (templates, spawns, entries) = match config.data_source {
        DataSource::Yaml => (
            mob_db::load_yaml(&config.mob_db_file, &config.battle)?,
            mob_db::load_spawns(&config.spawn_file)?,
            map_db::load_map_list(&config.map_list_file)?,
        ),
        DataSource::Sql => {
            let pool = database::connect(&config.database_url()).await.with_context(|| {
                format!(
                    "Cannot connect to MySQL (host={}:{} db={} user={})",
                    config.sql_ip, config.sql_port, config.sql_db, config.sql_id
                )
            })?;
            let loaded = (
                mob_db::load_sql(&pool, &config.battle).await?,
                mob_db::load_spawns_sql(&pool, config.server_id).await?,
                map_db::load_map_list_sql(&pool, config.server_id).await?,
            );
            pool.close().await;
            loaded
        }
    };

    let mut directory = EntityDirectory::new();
    let count = map_db::load_maps(&mut directory, &entries, maps_dir);
    anyhow::ensure!(count > 0, "no map could be loaded from {}", maps_dir.display());
    let castles = map_db::load_castles(&config.castle_file)?;

    Ok(WorldData { templates, spawns, directory, castles })
}

/// Build the world from loaded data, register the AI passes and fill every
/// spawn site. Spawn lines that do not resolve are skipped with a warning.
pub fn assemble_world<T: TickSource + 'static>(config: &ServerConfig, data: WorldData, clock: T) -> Result<MapWorld> {
    let castles: Vec<Castle> = data
        .castles
        .into_iter()
        .filter(|c| {
            let hosted = data.directory.mapname2mapid(&c.map).is_some();
            if !hosted {
                tracing::warn!("[map] castle {} is on unhosted map {}", c.name, c.map);
            }
            hosted
        })
        .collect();

    let mut world = MapWorldBuilder::new()
        .battle(config.battle.clone())
        .clock(clock)
        .directory(data.directory)
        .templates(data.templates)
        .castles(castles)
        .build();

    let total = data.spawns.len();
    for line in data.spawns {
        let (class_, map) = (line.class_, line.map.clone());
        if let Err(e) = spawn::add_site(&mut world, line) {
            tracing::warn!("[map] skipping spawn of {class_} on {map}: {e}");
        }
    }
    tracing::info!("[map] {} of {total} spawn lines accepted", world.spawns.len());

    world.register_ai_timers().context("Cannot register AI timers")?;
    let spawned = world.spawn_all();
    tracing::info!("[map] spawned {spawned} mobs on {} maps", world.map.map_count());
    Ok(world)
}

pub struct MapServer {
    pub world: MapWorld,
    pub state: ServerState,
    console: Arc<ConsoleQueue>,
}

impl MapServer {
    pub fn new(world: MapWorld, console: Arc<ConsoleQueue>) -> Self {
        MapServer { world, state: ServerState::new(), console }
    }

    pub fn console(&self) -> Arc<ConsoleQueue> {
        Arc::clone(&self.console)
    }

    /// Run one console command. False once shutdown was requested.
    pub fn handle_command(&mut self, cmd: ConsoleCommand) -> bool {
        match cmd {
            ConsoleCommand::Status => {
                tracing::info!(
                    "[map] uptime {} | players {} | mobs {} | timers {}",
                    format_uptime(self.state.uptime()),
                    self.world.map.players().len(),
                    self.world.map.mobs().len(),
                    self.world.timers.active()
                );
            }
            ConsoleCommand::Shutdown => {
                tracing::info!("[map] shutdown requested from console");
                self.state.request_shutdown();
            }
            ConsoleCommand::Unknown(word) => tracing::warn!("[map] unknown console command `{word}`"),
        }
        !self.state.should_shutdown()
    }

    /// Drain the console, then run every due timer. Returns how long the
    /// loop may sleep before the next timer is due.
    pub fn step(&mut self) -> Duration {
        for line in self.console.drain() {
            if let Some(cmd) = ConsoleCommand::parse(&line) {
                if !self.handle_command(cmd) {
                    return Duration::ZERO;
                }
            }
        }
        let delay = self.world.pump();
        Duration::from_millis(delay.max(0) as u64)
    }

    /// Loop until a shutdown command arrives.
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("[map] [ready] simulation loop running");
        loop {
            let delay = self.step();
            if self.state.should_shutdown() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.console.notified() => {}
            }
        }
        self.state.call_term_func();
        tracing::info!("[map] Shutting down...");
        Ok(())
    }
}

/// Queue a shutdown line when SIGINT or SIGTERM arrives. SIGHUP is only logged.
pub fn forward_signals(console: Arc<ConsoleQueue>) {
    tokio::spawn(async move {
        loop {
            let signal = wait_for_signal().await;
            tracing::info!("[map] received {signal:?}");
            if signal.should_shutdown() {
                console.push("shutdown".to_string());
                break;
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> Signal {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(mut term), Ok(mut hup)) => tokio::select! {
            _ = tokio::signal::ctrl_c() => Signal::Interrupt,
            _ = term.recv() => Signal::Terminate,
            _ = hup.recv() => Signal::Hangup,
        },
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("[map] cannot listen for SIGTERM/SIGHUP: {e}");
            let _ = tokio::signal::ctrl_c().await;
            Signal::Interrupt
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Signal {
    let _ = tokio::signal::ctrl_c().await;
    Signal::Interrupt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::MapGrid;
    use crate::game::mob::Mode;
    use crate::timer::ManualClock;

    fn config() -> ServerConfig {
        ServerConfig::from_str("map_ip: \"127.0.0.1\"\nspawn_file: spawns.yaml\n").unwrap()
    }

    fn data() -> WorldData {
        let mut directory = EntityDirectory::new();
        directory.add_map(MapGrid::open("prt_fild08", 30, 30));
        let templates = mob_db::build_db(
            vec![MobTemplate {
                id: 1002,
                name: "Poring".into(),
                max_hp: 50,
                mode: Mode::CANMOVE,
                ..MobTemplate::default()
            }],
            &Default::default(),
        );
        let spawns = vec![
            SpawnData { map: "prt_fild08".into(), num: 4, ..SpawnData::single(0, 0, 0, 1002) },
            SpawnData { map: "nowhere".into(), ..SpawnData::single(0, 0, 0, 1002) },
        ];
        let castles = vec![Castle::new(1, "Unhosted", "aldeg_cas01")];
        WorldData { templates, spawns, directory, castles }
    }

    #[test]
    fn test_assemble_world_spawns_resolved_sites() {
        let clock = ManualClock::new(1_000);
        let world = assemble_world(&config(), data(), clock).unwrap();
        assert_eq!(world.spawns.len(), 1);
        assert_eq!(world.spawns[0].active, 4);
        assert_eq!(world.map.mobs().len(), 4);
        assert!(world.castles.is_empty());
        assert_eq!(world.timers.active(), 2);
    }

    #[test]
    fn test_step_pumps_and_handles_console() {
        let clock = ManualClock::new(1_000);
        let world = assemble_world(&config(), data(), clock.clone()).unwrap();
        let mut server = MapServer::new(world, ConsoleQueue::new());
        assert_eq!(server.step(), Duration::from_millis(100));

        server.console().push("status".into());
        clock.advance(100);
        server.step();
        assert!(!server.state.should_shutdown());

        server.console().push("shutdown".into());
        assert_eq!(server.step(), Duration::ZERO);
        assert!(server.state.should_shutdown());
    }

    #[tokio::test]
    async fn test_run_stops_on_queued_shutdown() {
        let clock = ManualClock::new(1_000);
        let world = assemble_world(&config(), data(), clock).unwrap();
        let mut server = MapServer::new(world, ConsoleQueue::new());
        server.console().push("bogus".into());
        server.console().push("shutdown".into());
        tokio::time::timeout(Duration::from_secs(5), server.run()).await.unwrap().unwrap();
        assert!(server.state.should_shutdown());
    }
}
