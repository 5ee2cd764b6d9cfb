use std::path::PathBuf;

use roomcast_core::{logging, Config};

mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os("ROOMCAST_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    logging::init_logging(&config.logging)?;

    server::run(config).await
}
