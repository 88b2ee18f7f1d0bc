use std::sync::Arc;

use gattrpc_client::sim::{SimConfig, SimDevice, SimSelector};
use gattrpc_client::{ClientConfig, ClientEvent, EventKind, RpcClient, SecretStore, Value};
use serde::Serialize;
use tokio::time::Instant;

use crate::cmd::{parse_duration, SimulateArgs};
use crate::exit::{
    client_error, io_error, store_error, CliError, CliResult, PERMISSION_DENIED, SUCCESS, TIMEOUT,
};
use crate::output::{event_name, print_json, print_table, value_to_json, OutputFormat};

#[derive(Serialize)]
struct SimulateOutput {
    device: String,
    device_id: String,
    client_id: String,
    events: Vec<&'static str>,
    ready: bool,
    method: String,
    result: Option<serde_json::Value>,
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;

    let call_args: Vec<Value> = args.args.iter().map(|arg| parse_value(arg)).collect();
    let device = SimDevice::echo(SimConfig {
        pairable: !args.unpairable,
        ..SimConfig::default()
    });
    let store = Arc::new(SecretStore::in_memory());
    let client_id = store
        .client_id()
        .map_err(|err| store_error("failed to create client id", err))?;

    let (events, result) = runtime.block_on(async {
        let client = RpcClient::with_config(
            Arc::new(SimSelector::new(device.clone())),
            store.clone(),
            ClientConfig {
                call_timeout: Some(timeout),
                ..ClientConfig::default()
            },
        );
        let mut rx = client.subscribe();
        client
            .start()
            .map_err(|err| client_error("failed to start supervisor", err))?;
        client
            .select_device()
            .await
            .map_err(|err| client_error("device selection failed", err))?;

        let deadline = Instant::now() + timeout;
        let mut seen = Vec::new();
        let ready = loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) => {
                    let kind = event.kind();
                    seen.push(event);
                    match kind {
                        EventKind::Ready => break true,
                        EventKind::NeedPairing => break false,
                        _ => {}
                    }
                }
                Ok(None) => break false,
                Err(_) => {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("device not ready after {}", args.timeout),
                    ))
                }
            }
        };
        if !ready {
            return Ok((seen, None));
        }

        let value = client
            .call(&args.method, &call_args)
            .await
            .map_err(|err| client_error("call failed", err))?;
        client.shutdown();
        Ok::<_, CliError>((seen, Some(value)))
    })?;

    let out = SimulateOutput {
        device: device.config().name.clone(),
        device_id: hex::encode(&device.config().device_id),
        client_id: client_id.to_hex(),
        events: events.iter().map(event_name).collect(),
        ready: result.is_some(),
        method: args.method,
        result: result.as_ref().map(value_to_json),
    };
    print_output(&out, &events, result.as_ref(), format);

    if out.ready {
        Ok(SUCCESS)
    } else {
        eprintln!("error: device needs pairing but is not in pairing mode");
        Ok(PERMISSION_DENIED)
    }
}

fn print_output(
    out: &SimulateOutput,
    events: &[ClientEvent],
    result: Option<&Value>,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => print_table(
            &["FIELD", "VALUE"],
            [
                vec!["device".to_string(), out.device.clone()],
                vec!["device id".to_string(), out.device_id.clone()],
                vec!["client id".to_string(), out.client_id.clone()],
                vec!["events".to_string(), out.events.join(", ")],
                vec!["ready".to_string(), out.ready.to_string()],
                vec!["method".to_string(), out.method.clone()],
                vec![
                    "result".to_string(),
                    result.map(Value::to_string).unwrap_or_default(),
                ],
            ],
        ),
        OutputFormat::Pretty => {
            for event in events {
                match event {
                    ClientEvent::StatusChanged(status) => println!(
                        "event: status_changed connected={} authenticated={} needs_pairing={}",
                        status.connected, status.authenticated, status.needs_pairing
                    ),
                    other => println!("event: {}", event_name(other)),
                }
            }
            if let Some(value) = result {
                println!("{} -> {value}", out.method);
            }
        }
    }
}

/// Type a command-line argument.
fn parse_value(text: &str) -> Value {
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Nil,
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::Int(n);
    }
    if text.bytes().any(|b| b.is_ascii_digit()) {
        if let Ok(n) = text.parse::<f64>() {
            return Value::Float(n);
        }
    }
    if let Some(bytes) = text.strip_prefix("0x").and_then(|h| hex::decode(h).ok()) {
        return Value::Bytes(bytes);
    }
    Value::from(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_arguments() {
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("-12"), Value::Int(-12));
        assert_eq!(parse_value("1.5"), Value::Float(1.5));
        assert_eq!(parse_value("0x0aff"), Value::Bytes(vec![0x0a, 0xff]));
        assert_eq!(parse_value("null"), Value::Nil);
    }

    #[test]
    fn untyped_arguments_stay_strings() {
        assert_eq!(parse_value("nan"), Value::from("nan"));
        assert_eq!(parse_value("0xzz"), Value::from("0xzz"));
        assert_eq!(parse_value("hello"), Value::from("hello"));
    }
}
