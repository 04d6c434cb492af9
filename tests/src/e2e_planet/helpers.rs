//! Shared setup for planet scenarios.

#![allow(dead_code)]

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use slog::{Drain, Level, Logger, o};

use planet::resources::MASTER_DB_FILE;
use planet::{Planet, PlanetConfig, Reconfigure, Satellite};
use satellite::console::{CreateUser, User};
use satellite::db::SatelliteStore;
use satellite::identity::NodeId;
use satellite::overlay::CheckInInfo;

/// Upper bound for a satellite to react to cancellation.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates a logger for integration tests.
///
/// Respects the `RUST_LOG` environment variable (`error`, `warn`, `info`,
/// `debug`); defaults to warnings so passing runs stay quiet.
pub fn create_test_logger() -> Logger {
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|env_str| Level::from_str(&env_str).ok())
        .unwrap_or(Level::Warning);

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .build()
        .fuse()
        .filter_level(log_level)
        .fuse();

    slog::Logger::root(drain, o!())
}

pub fn planet_config(storage_node_count: usize) -> PlanetConfig {
    PlanetConfig {
        storage_node_count,
        ..PlanetConfig::default()
    }
}

/// A planet with `count` satellites already constructed.
pub async fn new_planet(config: PlanetConfig, reconfigure: Reconfigure, count: usize) -> Planet {
    let mut planet = Planet::new(create_test_logger(), config, reconfigure).unwrap();
    planet.new_satellites(count).await.unwrap();
    planet
}

pub fn new_user(name: &str) -> CreateUser {
    CreateUser {
        full_name: format!("{name} Example"),
        short_name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        password: String::new(),
    }
}

pub async fn add_user(satellite: &Satellite, name: &str) -> User {
    satellite.add_user(new_user(name), 3).await.unwrap()
}

/// True when no handle on the master database under `dir` is still open.
pub fn master_db_released(dir: &Path) -> bool {
    SatelliteStore::open(dir.join(MASTER_DB_FILE)).is_ok()
}

/// Checks in storage nodes `1..=count` with plenty of free disk.
pub fn check_in_storage_nodes(satellite: &Satellite, count: u8) -> Vec<NodeId> {
    (1..=count)
        .map(|n| {
            let id = NodeId([n; 32]);
            satellite
                .contact
                .service
                .check_in(&CheckInInfo {
                    id,
                    address: format!("127.0.0.1:{}", 28000 + u16::from(n)),
                    free_disk: 10 * satellite::memory::GB,
                })
                .unwrap();
            id
        })
        .collect()
}
