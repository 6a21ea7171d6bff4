use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::ContainerControl;

mod docker;
mod simulated;

pub use docker::DockerCli;
pub use simulated::{SimulatedContainers, SimulatedOp};

/// Pick the container engine adapter for this configuration.
pub fn container_control(config: &AppConfig) -> Arc<dyn ContainerControl> {
    if config.simulation {
        let sim = SimulatedContainers::with_ready_line("Done (0.1s)! For help, type \"help\"");
        // Seed a running container for every discovered server so a simulated
        // daemon has something to restore.
        let catalog = crate::core::ServerCatalog::new(&config.servers_base_path);
        for name in catalog.discover_servers().unwrap_or_default() {
            sim.add_container(&name, true);
            sim.add_container(&format!("{}{}", name, config.backup_container_suffix), true);
        }
        return Arc::new(sim);
    }

    Arc::new(DockerCli::new(config.container_engine.clone()))
}
