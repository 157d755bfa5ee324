use std::sync::Arc;

use sendgate_core::{
    config::Config,
    ports::{SystemClock, TokioWaiter},
};

#[tokio::main]
async fn main() -> Result<(), sendgate_core::Error> {
    sendgate_core::logging::init("sendgate")?;

    let cfg = Arc::new(Config::load()?);

    sendgate_http::serve(cfg, Arc::new(SystemClock), Arc::new(TokioWaiter))
        .await
        .map_err(|e| sendgate_core::Error::External(format!("http server failed: {e}")))?;

    Ok(())
}
