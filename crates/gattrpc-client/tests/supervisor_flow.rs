#![cfg(feature = "sim")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use gattrpc_client::sim::{
    echo_handler, AppHandler, SimChannel, SimConfig, SimDevice, SimSelector,
};
use gattrpc_client::{
    ClientConfig, ClientError, ClientEvent, EventKind, RpcClient, SecretStore, Value,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

fn client_for(device: &Arc<SimDevice>, config: ClientConfig) -> Arc<RpcClient> {
    Arc::new(RpcClient::with_config(
        Arc::new(SimSelector::new(device.clone())),
        Arc::new(SecretStore::in_memory()),
        config,
    ))
}

/// Collect events up to and including the first one of `kind`.
async fn until(rx: &mut UnboundedReceiver<ClientEvent>, kind: EventKind) -> Vec<ClientEvent> {
    let collect = async {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = event.kind() == kind;
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    };
    tokio::time::timeout(Duration::from_secs(120), collect)
        .await
        .unwrap_or_else(|_| panic!("no {kind:?} event"))
}

async fn ready_client(
    device: &Arc<SimDevice>,
) -> (Arc<RpcClient>, UnboundedReceiver<ClientEvent>) {
    let client = client_for(device, ClientConfig::default());
    let mut events = client.subscribe();
    client.start().unwrap();
    client.select_device().await.unwrap();
    until(&mut events, EventKind::Ready).await;
    (client, events)
}

#[tokio::test(start_paused = true)]
async fn pairing_flow_ends_ready() {
    let device = SimDevice::echo(SimConfig::default());
    let client = client_for(&device, ClientConfig::default());
    let mut events = client.subscribe();
    client.start().unwrap();
    client.select_device().await.unwrap();

    let seen = until(&mut events, EventKind::Ready).await;
    let kinds: Vec<_> = seen.iter().map(ClientEvent::kind).collect();
    assert_eq!(
        kinds,
        [
            EventKind::StatusChanged,
            EventKind::Connected,
            EventKind::StatusChanged,
            EventKind::Ready,
        ]
    );

    assert!(client.ready());
    assert!(!client.needs_pairing());
    assert_eq!(client.store().device_ids(), [hex::encode(&device.config().device_id)]);
    assert_eq!(device.paired_clients(), 1);
    assert!(!device.is_pairable());

    let echoed = client.call("echo", &[Value::from("hello")]).await.unwrap();
    assert_eq!(echoed, Value::from("hello"));
}

#[tokio::test(start_paused = true)]
async fn rejection_forgets_secret_until_paired_again() {
    let device = SimDevice::echo(SimConfig::default());
    let (client, mut events) = ready_client(&device).await;

    device.revoke_all();
    device.disconnect();
    until(&mut events, EventKind::Disconnected).await;
    assert!(!client.ready());

    let seen = until(&mut events, EventKind::NeedPairing).await;
    assert!(seen.iter().any(|e| e.kind() == EventKind::Connected));
    assert!(client.needs_pairing());
    assert!(!client.ready());
    assert!(client.store().device_ids().is_empty());
    assert!(matches!(
        client.call("echo", &[]).await,
        Err(ClientError::NotReady)
    ));

    device.set_pairable(true);
    until(&mut events, EventKind::Ready).await;
    assert!(client.ready());
    assert!(!client.needs_pairing());
    assert_eq!(client.store().device_ids().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unpairable_device_needs_pairing() {
    let device = SimDevice::echo(SimConfig {
        pairable: false,
        ..SimConfig::default()
    });
    let client = client_for(&device, ClientConfig::default());
    let mut events = client.subscribe();
    client.start().unwrap();
    client.select_device().await.unwrap();

    until(&mut events, EventKind::NeedPairing).await;
    let status = client.status();
    assert!(status.connected && !status.authenticated && status.needs_pairing);
    assert!(client.is_connected());
    assert_eq!(device.paired_clients(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_keep_submission_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let log = order.clone();
    let handler: AppHandler = Arc::new(move |method: &str, args: &[Value]| {
        log.lock().unwrap().push(method.to_string());
        Ok(args.first().cloned().unwrap_or_default())
    });
    let device = SimDevice::new(
        SimConfig {
            write_latency: Duration::from_millis(3),
            ..SimConfig::default()
        },
        handler,
    );
    let (client, _events) = ready_client(&device).await;
    device.clear_writes();

    let a = vec![0xaa; 800];
    let b = vec![0xbb; 800];
    let args_a = [Value::from(a.clone())];
    let args_b = [Value::from(b.clone())];
    let (ra, rb) = tokio::join!(
        client.call("a", &args_a),
        client.call("b", &args_b),
    );
    assert_eq!(ra.unwrap(), Value::Bytes(a));
    assert_eq!(rb.unwrap(), Value::Bytes(b));
    assert_eq!(*order.lock().unwrap(), ["a", "b"]);

    let ids: Vec<u8> = device
        .writes()
        .iter()
        .filter(|w| w.channel == SimChannel::Rpc)
        .map(|w| w.header.message_id)
        .collect();
    assert_eq!(ids.len(), 8);
    assert!(ids[..4].iter().all(|&id| id == ids[0]));
    assert!(ids[4..].iter().all(|&id| id == ids[4]));
    assert_ne!(ids[0], ids[4]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_call_rejects_it() {
    let device = SimDevice::echo(SimConfig::default());
    let (client, mut events) = ready_client(&device).await;

    device.stall_reads(true);
    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.call("echo", &[Value::from(1)]).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    device.disconnect();

    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_disconnected(), "unexpected error: {err}");
    until(&mut events, EventKind::Disconnected).await;
    match events.recv().await {
        Some(ClientEvent::StatusChanged(status)) => {
            assert!(!status.connected && !status.authenticated)
        }
        other => panic!("expected a status change, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_call_times_out() {
    let device = SimDevice::echo(SimConfig::default());
    let client = client_for(
        &device,
        ClientConfig {
            call_timeout: Some(Duration::from_secs(2)),
            ..ClientConfig::default()
        },
    );
    let mut events = client.subscribe();
    client.start().unwrap();
    client.select_device().await.unwrap();
    until(&mut events, EventKind::Ready).await;

    device.stall_reads(true);
    let err = client.call("echo", &[]).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(d) if d == Duration::from_secs(2)));

    // The queue is not poisoned by the abandoned call.
    device.stall_reads(false);
    let value = client.call("ping", &[]).await.unwrap();
    assert_eq!(value, Value::from("pong"));
}

#[tokio::test(start_paused = true)]
async fn failed_connect_retries_after_debounce() {
    let device = SimDevice::new(SimConfig::default(), echo_handler());
    device.fail_connects(1);
    let client = client_for(&device, ClientConfig::default());
    let mut events = client.subscribe();
    client.start().unwrap();

    let started = Instant::now();
    client.select_device().await.unwrap();
    until(&mut events, EventKind::Connected).await;

    assert!(started.elapsed() >= Duration::from_millis(5000));
    assert_eq!(device.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn remote_error_keeps_connection() {
    let device = SimDevice::echo(SimConfig::default());
    let (client, _events) = ready_client(&device).await;

    let err = client.call("reboot", &[]).await.unwrap_err();
    match &err {
        ClientError::Rpc { method, detail } => {
            assert_eq!(method, "reboot");
            assert_eq!(detail, &Value::from("Unknown method: reboot"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.to_string(), "RPC Error: Unknown method: reboot");
    assert!(client.ready());
}

#[tokio::test(start_paused = true)]
async fn reselecting_replaces_device() {
    let device = SimDevice::echo(SimConfig::default());
    let (client, mut events) = ready_client(&device).await;

    client.select_device().await.unwrap();
    assert!(!client.ready());
    assert!(client.is_device_selected());

    until(&mut events, EventKind::Ready).await;
    assert!(client.ready());
    assert_eq!(device.connect_count(), 2);
}
