use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use gattrpc_client::{ClientEvent, Value};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_table<R, C>(header: &[&str], rows: R)
where
    R: IntoIterator<Item = Vec<C>>,
    C: Into<comfy_table::Cell>,
{
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

/// JSON rendering of an RPC value. Byte strings become `0x`-prefixed hex.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Bool(b) => (*b).into(),
        Value::Int(n) => (*n).into(),
        Value::Float(n) => (*n).into(),
        Value::String(s) => s.clone().into(),
        Value::Bytes(b) => format!("0x{}", hex::encode(b)).into(),
        Value::Array(items) => items.iter().map(value_to_json).collect(),
        Value::Map(entries) => entries
            .iter()
            .map(|(k, v)| {
                let key = match k {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key, value_to_json(v))
            })
            .collect::<serde_json::Map<_, _>>()
            .into(),
    }
}

pub fn event_name(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::Connected => "connected",
        ClientEvent::Disconnected => "disconnected",
        ClientEvent::Ready => "ready",
        ClientEvent::NeedPairing => "need_pairing",
        ClientEvent::StatusChanged(_) => "status_changed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_render_as_hex() {
        let json = value_to_json(&Value::Array(vec![
            Value::Bytes(vec![0xde, 0xad]),
            Value::Int(-1),
            Value::Nil,
        ]));
        assert_eq!(json, serde_json::json!(["0xdead", -1, null]));
    }

    #[test]
    fn map_keys_are_stringified() {
        let json = value_to_json(&Value::Map(vec![
            (Value::from("a"), Value::Bool(true)),
            (Value::Int(2), Value::from("b")),
        ]));
        assert_eq!(json, serde_json::json!({"a": true, "2": "b"}));
    }
}
