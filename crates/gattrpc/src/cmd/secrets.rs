use gattrpc_client::SecretStore;
use serde::Serialize;

use crate::cmd::{SecretsAction, SecretsArgs};
use crate::exit::{store_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct ListOutput<'a> {
    store: String,
    devices: &'a [String],
}

#[derive(Serialize)]
struct ForgetOutput<'a> {
    device_id: &'a str,
    forgotten: bool,
}

pub fn run(args: SecretsArgs, format: OutputFormat) -> CliResult<i32> {
    let dir = args.store.dir();
    let store = SecretStore::open(&dir);

    match args.action {
        SecretsAction::List => {
            let devices = store.device_ids();
            match format {
                OutputFormat::Json => print_json(&ListOutput {
                    store: dir.display().to_string(),
                    devices: &devices,
                }),
                OutputFormat::Table => {
                    print_table(&["DEVICE ID"], devices.iter().map(|id| vec![id.as_str()]))
                }
                OutputFormat::Pretty => {
                    for id in &devices {
                        println!("{id}");
                    }
                }
            }
            Ok(SUCCESS)
        }
        SecretsAction::Forget { device_id } => {
            let id = parse_device_id(&device_id)?;
            let forgotten = store.has_secret(&id);
            store
                .set_secret(&id, None)
                .map_err(|err| store_error("failed to forget secret", err))?;

            let normalized = hex::encode(&id);
            match format {
                OutputFormat::Json => print_json(&ForgetOutput {
                    device_id: &normalized,
                    forgotten,
                }),
                OutputFormat::Table | OutputFormat::Pretty if forgotten => {
                    println!("forgot {normalized}")
                }
                OutputFormat::Table | OutputFormat::Pretty => {
                    println!("no secret stored for {normalized}")
                }
            }
            Ok(if forgotten { SUCCESS } else { FAILURE })
        }
        SecretsAction::Clear => {
            let count = store.device_ids().len();
            store
                .clear()
                .map_err(|err| store_error("failed to clear secrets", err))?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "cleared": count })),
                OutputFormat::Table | OutputFormat::Pretty => {
                    println!("cleared {count} secret(s)")
                }
            }
            Ok(SUCCESS)
        }
    }
}

fn parse_device_id(input: &str) -> CliResult<Vec<u8>> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let id = hex::decode(trimmed)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid device id {input:?}: {err}")))?;
    if id.is_empty() {
        return Err(CliError::new(DATA_INVALID, "device id must not be empty"));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_accepts_prefix_and_case() {
        assert_eq!(parse_device_id("0xAB01").unwrap(), vec![0xab, 0x01]);
        assert_eq!(parse_device_id("ab01").unwrap(), vec![0xab, 0x01]);
    }

    #[test]
    fn device_id_rejects_garbage() {
        assert_eq!(parse_device_id("xyz").unwrap_err().code, DATA_INVALID);
        assert_eq!(parse_device_id("").unwrap_err().code, DATA_INVALID);
    }
}
