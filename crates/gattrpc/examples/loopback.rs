//! Pair with a simulated device, authenticate and call a method.
//!
//! Run with:
//!   cargo run --example loopback
//!
//! The device state lives in memory, so every run pairs from scratch.

use std::sync::Arc;

use gattrpc::client::sim::{SimConfig, SimDevice, SimSelector};
use gattrpc::client::{ClientEvent, RpcClient, SecretStore, Value};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let device = SimDevice::echo(SimConfig::default());
    let client = RpcClient::new(
        Arc::new(SimSelector::new(device.clone())),
        Arc::new(SecretStore::in_memory()),
    );

    let mut events = client.subscribe();
    client.start()?;
    client.select_device().await?;

    while let Some(event) = events.recv().await {
        eprintln!("event: {event:?}");
        match event {
            ClientEvent::Ready => break,
            ClientEvent::NeedPairing => return Err("device refused pairing".into()),
            _ => {}
        }
    }

    let reply = client.call("echo", &[Value::from("hello over chunks")]).await?;
    eprintln!("echo -> {reply}");

    let big = vec![0x5a; 4000];
    let reply = client.call("echo", &[Value::from(big.clone())]).await?;
    assert_eq!(reply.as_bytes(), Some(&big[..]));
    eprintln!(
        "echoed {} bytes in {} chunk writes",
        big.len(),
        device.writes().len()
    );

    Ok(())
}
