// Terminal renderer: prints a frame every time the grid changes.
use grid_traffic::{start, SimulationConfig, SimulationResult};

#[tokio::main]
async fn main() -> SimulationResult<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => SimulationConfig::from_json_file(path)?,
        None => SimulationConfig::default(),
    };
    let handle = start(config)?;

    let mut updates = handle.updates();
    while updates.changed().await.is_ok() {
        let view = updates.borrow_and_update().clone();
        println!("{view}");
        if !view.running {
            break;
        }
    }

    let report = handle.wait().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
