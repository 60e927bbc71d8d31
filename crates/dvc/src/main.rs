use std::sync::Arc;

use dvc_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), dvc_core::Error> {
    dvc_core::logging::init("dvc")?;

    let cfg = Arc::new(Config::load()?);

    dvc_discord::router::run(cfg)
        .await
        .map_err(|e| dvc_core::Error::External(format!("discord bot failed: {e}")))?;

    Ok(())
}
