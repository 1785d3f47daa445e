// simulation_main.rs
use grid_traffic::{start, SimulationConfig};
use log::{error, info};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => match SimulationConfig::from_json_file(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("could not load {path}: {e}");
                std::process::exit(1);
            }
        },
        None => SimulationConfig::default(),
    };
    info!("config: {config:?}");

    let handle = match start(config) {
        Ok(handle) => handle,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    match handle.wait().await {
        Ok(report) => info!("{report:?}"),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}
