use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod chunk;
pub mod identity;
pub mod secrets;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show version information.
    Version(VersionArgs),
    /// Print this installation's client id, creating it if needed.
    Identity(IdentityArgs),
    /// Inspect or forget stored device secrets.
    Secrets(SecretsArgs),
    /// Show how a message is split into chunks.
    Chunk(ChunkArgs),
    /// Pair, authenticate and call a method on a simulated device.
    Simulate(SimulateArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Identity(args) => identity::run(args, format),
        Command::Secrets(args) => secrets::run(args, format),
        Command::Chunk(args) => chunk::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Secret store directory. Default: $HOME/.config/gattrpc.
    #[arg(long, value_name = "DIR", env = "GATTRPC_STORE_DIR")]
    pub store: Option<PathBuf>,
}

impl StoreArgs {
    pub fn dir(&self) -> PathBuf {
        if let Some(dir) = &self.store {
            return dir.clone();
        }
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(".config").join("gattrpc"),
            None => PathBuf::from(".gattrpc"),
        }
    }
}

#[derive(Args, Debug)]
pub struct IdentityArgs {
    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Args, Debug)]
pub struct SecretsArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub action: SecretsAction,
}

#[derive(Subcommand, Debug)]
pub enum SecretsAction {
    /// List devices with a stored secret.
    List,
    /// Forget the secret of one device.
    Forget {
        /// Device id as hex (as printed by `secrets list`).
        device_id: String,
    },
    /// Forget all device secrets. The client id is kept.
    Clear,
}

#[derive(Args, Debug)]
pub struct ChunkArgs {
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Hex-encoded payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub file: Option<PathBuf>,
    /// Link MTU in bytes, header included.
    #[arg(long, default_value_t = gattrpc_frame::DEFAULT_MTU)]
    pub mtu: usize,
    /// Message id stamped on every chunk.
    #[arg(long, default_value_t = 1)]
    pub message_id: u8,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Method to call once the device is ready.
    #[arg(long, default_value = "ping")]
    pub method: String,
    /// Call argument (repeatable). `true`/`false`, integers, floats and
    /// `0x`-prefixed hex are typed; anything else is a string.
    #[arg(long = "arg", value_name = "VALUE")]
    pub args: Vec<String>,
    /// Start the device outside pairing mode.
    #[arg(long)]
    pub unpairable: bool,
    /// Maximum time to reach the ready state and complete the call (e.g. 5s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration(" ").is_err());
    }

    #[test]
    fn explicit_store_dir_wins() {
        let args = StoreArgs {
            store: Some(PathBuf::from("/tmp/gattrpc-store")),
        };
        assert_eq!(args.dir(), PathBuf::from("/tmp/gattrpc-store"));
    }
}
