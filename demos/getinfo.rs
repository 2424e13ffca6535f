use std::error::Error;

use eclair_client::rpc::Params;
use eclair_client::ClientConfig;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // ECLAIR_HOST=127.0.0.1:8080 ECLAIR_PASSWORD=... cargo run --example getinfo
    let config = ClientConfig::from_env()?;
    let client = config.rpc_client()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let info = client.call("getinfo", &Params::new()).await?;
        println!(
            "node_id={} alias={} block_height={}",
            info.str("nodeId").unwrap_or("?"),
            info.str("alias").unwrap_or("?"),
            info.u64("blockHeight").unwrap_or_default(),
        );

        let channels = client.call_no_params("channels").await?;
        let count = channels.as_value().as_array().map_or(0, Vec::len);
        println!("channels={count}");

        Ok::<(), Box<dyn Error>>(())
    })
}
