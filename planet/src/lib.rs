pub mod config;
pub mod factory;
pub mod node;
pub mod planet;
pub mod reconfigure;
pub mod resources;
pub mod teardown;

pub use config::PlanetConfig;
pub use node::Satellite;
pub use planet::Planet;
pub use reconfigure::Reconfigure;
pub use teardown::Teardown;
