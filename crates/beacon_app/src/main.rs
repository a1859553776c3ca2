mod config;
mod logging;
mod runner;

use beacon_logging::beacon_info;

fn main() -> anyhow::Result<()> {
    let config = config::AppConfig::from_env()?;
    logging::initialize(config.log_destination, config.log_level);
    beacon_info!("beacon_app starting");
    runner::run(config)
}
