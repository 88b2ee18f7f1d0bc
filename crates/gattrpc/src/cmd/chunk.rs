use std::fs;

use gattrpc_frame::{split_message, ChunkHeader, HEADER_SIZE};
use serde::Serialize;

use crate::cmd::ChunkArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct ChunkRow {
    sequence: u16,
    flags: String,
    payload_size: usize,
    wire_size: usize,
}

#[derive(Serialize)]
struct ChunkOutput {
    message_id: u8,
    mtu: usize,
    size: usize,
    chunks: Vec<ChunkRow>,
}

pub fn run(args: ChunkArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let wire = split_message(args.message_id, &payload, args.mtu)
        .map_err(|err| frame_error("failed to chunk message", err))?;

    let chunks = wire
        .iter()
        .filter_map(|chunk| {
            let header = ChunkHeader::decode(chunk)?;
            Some(ChunkRow {
                sequence: header.sequence,
                flags: header.flags.to_string(),
                payload_size: chunk.len() - HEADER_SIZE,
                wire_size: chunk.len(),
            })
        })
        .collect();
    let out = ChunkOutput {
        message_id: args.message_id,
        mtu: args.mtu,
        size: payload.len(),
        chunks,
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["SEQ", "FLAGS", "PAYLOAD", "WIRE"],
            out.chunks.iter().map(|c| {
                vec![
                    c.sequence.to_string(),
                    c.flags.clone(),
                    c.payload_size.to_string(),
                    c.wire_size.to_string(),
                ]
            }),
        ),
        OutputFormat::Pretty => {
            println!(
                "message_id={} mtu={} size={} chunks={}",
                out.message_id,
                out.mtu,
                out.size,
                out.chunks.len()
            );
            for c in &out.chunks {
                println!(
                    "  seq={} flags={} payload={}",
                    c.sequence, c.flags, c.payload_size
                );
            }
        }
    }
    Ok(SUCCESS)
}

fn resolve_payload(args: &ChunkArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(text) = &args.hex {
        let text = text.trim();
        return hex::decode(text.strip_prefix("0x").unwrap_or(text))
            .map_err(|err| CliError::new(DATA_INVALID, format!("--hex is not valid hex: {err}")));
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}
