//! Well-known identifiers of the RPC service.

use uuid::Uuid;

/// The single logical service exposed by the device.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x5f52_4546_4c4f_575f_5250_435f_5356_435f);

/// Application RPC channel.
pub const RPC_CHANNEL_UUID: Uuid = Uuid::from_u128(0x5f52_4546_4c4f_575f_5250_435f_494f_5f5f);

/// Authentication and pairing channel.
pub const AUTH_CHANNEL_UUID: Uuid = Uuid::from_u128(0x5f52_4546_4c4f_575f_5250_435f_4155_5448);

/// Returns a human-readable name for a well-known channel.
pub fn channel_name(id: &Uuid) -> &'static str {
    match *id {
        RPC_CHANNEL_UUID => "RPC",
        AUTH_CHANNEL_UUID => "AUTH",
        SERVICE_UUID => "SERVICE",
        _ => "UNKNOWN",
    }
}
