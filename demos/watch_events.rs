use std::error::Error;

use eclair_client::{ClientConfig, StreamStatus};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ClientConfig::from_env()?;
    let client = config.event_stream_client()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let (mut events, mut status, closer) = client.open().split();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                Some(update) = status.recv() => {
                    println!("status={update:?}");
                    if update == StreamStatus::Closed {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Some(event) => match event.str("type") {
                        Some("payment-received") => println!(
                            "payment received hash={} amount={}",
                            event.str("paymentHash").unwrap_or("?"),
                            event.get("parts.0.amount").map(ToString::to_string).unwrap_or_default(),
                        ),
                        Some(kind) => println!("event type={kind}"),
                        None => println!("event {}", event.raw()),
                    },
                    None => break,
                },
            }
        }

        closer.close().await;
        Ok::<(), Box<dyn Error>>(())
    })
}
