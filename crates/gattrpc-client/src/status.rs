use serde::Serialize;

/// Snapshot of the four connection flags.
///
/// `authenticated` implies `connected`, and `authenticated` and
/// `needs_pairing` are never both set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub authenticated: bool,
    pub needs_pairing: bool,
    pub device_selected: bool,
}

impl ConnectionStatus {
    /// Connected and authenticated: the only state in which calls proceed.
    pub fn ready(&self) -> bool {
        self.connected && self.authenticated
    }
}
