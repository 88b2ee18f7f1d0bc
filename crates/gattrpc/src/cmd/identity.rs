use gattrpc_client::SecretStore;
use serde::Serialize;

use crate::cmd::IdentityArgs;
use crate::exit::{store_error, CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct IdentityOutput {
    client_id: String,
    store: String,
}

pub fn run(args: IdentityArgs, format: OutputFormat) -> CliResult<i32> {
    let dir = args.store.dir();
    let store = SecretStore::open(&dir);
    let client_id = store
        .client_id()
        .map_err(|err| store_error("failed to load client id", err))?;

    let out = IdentityOutput {
        client_id: client_id.to_hex(),
        store: dir.display().to_string(),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["CLIENT ID", "STORE"],
            [vec![out.client_id, out.store]],
        ),
        OutputFormat::Pretty => println!("{}", out.client_id),
    }
    Ok(SUCCESS)
}
