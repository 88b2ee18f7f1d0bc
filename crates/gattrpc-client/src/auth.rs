use std::fmt;
use std::sync::Arc;

use gattrpc_frame::MessageTransport;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{ClientError, Result};
use crate::rpc::RpcCaller;
use crate::secret_store::{ClientId, Secret, SecretStore};
use crate::value::Value;

const MAX_DEVICE_ID_LEN: usize = 64;
const MAX_CHALLENGE_LEN: usize = 256;
const MAX_SECRET_LEN: usize = 256;

/// Challenge published by the device on the auth channel.
///
/// Fetched fresh for every attempt and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Stable device identifier; keys the stored secret.
    pub device_id: Vec<u8>,
    /// Message to sign. May rotate after pairing.
    pub challenge: Vec<u8>,
    /// Whether the device currently accepts pairing.
    pub pairable: bool,
}

impl AuthChallenge {
    pub fn device_id_hex(&self) -> String {
        hex::encode(&self.device_id)
    }
}

/// `auth_info` payload, itself MessagePack-encoded inside the RPC result.
#[derive(Serialize, Deserialize)]
pub(crate) struct AuthInfoWire {
    pub id: Value,
    pub hmac_msg: Value,
    pub pairable: bool,
}

/// Result of one authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The device accepted our signature.
    Authenticated,
    /// No secret is stored and the device is not in pairing mode.
    PairingUnavailable,
    /// The device rejected the signature; the stored secret was deleted.
    Rejected,
}

impl AuthOutcome {
    pub fn is_authenticated(self) -> bool {
        self == AuthOutcome::Authenticated
    }
}

/// HMAC-SHA256 of `challenge` keyed with `secret`.
pub fn sign_challenge(secret: &[u8], challenge: &[u8]) -> [u8; 32] {
    hmac_sha256::HMAC::mac(challenge, secret)
}

/// Runs pairing and challenge/response over the auth channel.
pub struct Authenticator {
    rpc: Arc<RpcCaller<dyn MessageTransport>>,
    store: Arc<SecretStore>,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    pub fn new(
        rpc: Arc<RpcCaller<dyn MessageTransport>>,
        store: Arc<SecretStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { rpc, store, clock }
    }

    pub fn store(&self) -> &Arc<SecretStore> {
        &self.store
    }

    /// Authenticate with the device, pairing first if needed and allowed.
    ///
    /// A rejected signature deletes the stored secret for the device.
    pub async fn authenticate(&self) -> Result<AuthOutcome> {
        let client_id = self.store.client_id()?;
        let mut challenge = self.fetch_challenge().await?;

        let secret = match self.store.get_secret(&challenge.device_id) {
            Some(secret) => secret,
            None => {
                if !challenge.pairable {
                    tracing::info!(
                        device_id = %challenge.device_id_hex(),
                        "no stored secret and device is not pairable"
                    );
                    return Ok(AuthOutcome::PairingUnavailable);
                }

                let Some(secret) = self.pair(&client_id).await? else {
                    return Ok(AuthOutcome::PairingUnavailable);
                };
                self.store
                    .set_secret(&challenge.device_id, Some(secret.as_bytes()))?;
                tracing::info!(device_id = %challenge.device_id_hex(), "paired with device");

                challenge = self.fetch_challenge().await?;
                secret
            }
        };

        let signature = sign_challenge(secret.as_bytes(), &challenge.challenge);
        let timestamp = i64::try_from(self.clock.unix_millis()).unwrap_or(i64::MAX);
        let accepted = self
            .rpc
            .call(
                "authenticate",
                &[
                    Value::from(client_id.as_bytes()),
                    Value::from(&signature[..]),
                    Value::Int(timestamp),
                ],
            )
            .await?;

        if accepted.as_bool() == Some(true) {
            tracing::info!(device_id = %challenge.device_id_hex(), "authenticated");
            return Ok(AuthOutcome::Authenticated);
        }

        tracing::warn!(
            device_id = %challenge.device_id_hex(),
            "device rejected signature, forgetting stored secret"
        );
        self.store.set_secret(&challenge.device_id, None)?;
        Ok(AuthOutcome::Rejected)
    }

    /// Fetch and validate the current challenge.
    pub async fn fetch_challenge(&self) -> Result<AuthChallenge> {
        let result = self.rpc.call("auth_info", &[]).await?;
        let payload = result
            .into_bytes()
            .ok_or_else(|| unexpected("auth_info", "expected bytes"))?;
        let wire: AuthInfoWire = rmp_serde::from_slice(&payload)?;

        let device_id = wire
            .id
            .into_bytes()
            .ok_or_else(|| unexpected("auth_info", "id is not bytes"))?;
        let challenge = wire
            .hmac_msg
            .into_bytes()
            .ok_or_else(|| unexpected("auth_info", "hmac_msg is not bytes"))?;
        validate_len("auth_info", "id", &device_id, MAX_DEVICE_ID_LEN)?;
        validate_len("auth_info", "hmac_msg", &challenge, MAX_CHALLENGE_LEN)?;

        Ok(AuthChallenge {
            device_id,
            challenge,
            pairable: wire.pairable,
        })
    }

    /// Request a new secret. Returns `None` if the device handed out none.
    pub async fn pair(&self, client_id: &ClientId) -> Result<Option<Secret>> {
        let result = self
            .rpc
            .call("pair", &[Value::from(client_id.as_bytes())])
            .await?;

        let Some(bytes) = result.into_bytes() else {
            tracing::warn!("device returned no pairing secret");
            return Ok(None);
        };
        if bytes.is_empty() {
            tracing::warn!("device returned an empty pairing secret");
            return Ok(None);
        }
        validate_len("pair", "secret", &bytes, MAX_SECRET_LEN)?;
        Ok(Some(Secret::new(bytes)))
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("store", &self.store)
            .finish()
    }
}

fn unexpected(method: &str, detail: &str) -> ClientError {
    ClientError::UnexpectedResult {
        method: method.to_string(),
        detail: detail.to_string(),
    }
}

fn validate_len(method: &str, field: &str, bytes: &[u8], max: usize) -> Result<()> {
    if bytes.is_empty() || bytes.len() > max {
        return Err(unexpected(
            method,
            &format!("{field} length {} outside 1..={max}", bytes.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use gattrpc_frame::FrameError;

    use super::*;
    use crate::clock::ManualClock;
    use crate::rpc::{RpcRequest, RpcResponse};

    const DEVICE: &[u8] = &[0xD0, 0x0D, 0x01, 0x02, 0x03, 0x04];

    #[derive(Default)]
    struct ScriptedAuthChannel {
        responses: Mutex<VecDeque<RpcResponse>>,
        requests: Mutex<Vec<RpcRequest>>,
    }

    impl ScriptedAuthChannel {
        fn push(&self, ok: bool, result: Value) -> &Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(RpcResponse { ok, result });
            self
        }

        fn push_info(&self, challenge: &[u8], pairable: bool) -> &Self {
            let info = AuthInfoWire {
                id: Value::from(DEVICE),
                hmac_msg: Value::from(challenge),
                pairable,
            };
            self.push(true, Value::Bytes(rmp_serde::to_vec_named(&info).unwrap()))
        }

        fn methods(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.method.clone())
                .collect()
        }
    }

    #[async_trait]
    impl MessageTransport for ScriptedAuthChannel {
        async fn send(&self, message: &[u8]) -> gattrpc_frame::Result<Bytes> {
            let request: RpcRequest = rmp_serde::from_slice(message).unwrap();
            self.requests.lock().unwrap().push(request);
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(FrameError::EmptyResponse)?;
            Ok(Bytes::from(rmp_serde::to_vec_named(&response).unwrap()))
        }
    }

    fn authenticator(channel: Arc<ScriptedAuthChannel>, store: Arc<SecretStore>) -> Authenticator {
        let transport: Arc<dyn MessageTransport> = channel;
        Authenticator::new(
            Arc::new(RpcCaller::new(transport)),
            store,
            Arc::new(ManualClock::new()),
        )
    }

    #[test]
    fn signature_is_hmac_sha256() {
        let sig = sign_challenge(b"key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            hex::encode(sig),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[tokio::test]
    async fn known_secret_authenticates() {
        let store = Arc::new(SecretStore::in_memory());
        store.set_secret(DEVICE, Some(&[5; 32])).unwrap();
        let channel = Arc::new(ScriptedAuthChannel::default());
        channel.push_info(b"challenge", false).push(true, Value::Bool(true));

        let auth = authenticator(channel.clone(), store.clone());
        let outcome = auth.authenticate().await.expect("attempt should complete");

        assert_eq!(outcome, AuthOutcome::Authenticated);
        assert_eq!(channel.methods(), vec!["auth_info", "authenticate"]);

        let request = channel.requests.lock().unwrap()[1].clone();
        let client_id = store.client_id().unwrap();
        assert_eq!(request.args[0], Value::from(client_id.as_bytes()));
        assert_eq!(
            request.args[1],
            Value::from(&sign_challenge(&[5; 32], b"challenge")[..])
        );
        assert!(request.args[2].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn pairs_when_no_secret_and_pairable() {
        let store = Arc::new(SecretStore::in_memory());
        let channel = Arc::new(ScriptedAuthChannel::default());
        channel
            .push_info(b"before", true)
            .push(true, Value::Bytes(vec![9; 32]))
            .push_info(b"after", false)
            .push(true, Value::Bool(true));

        let auth = authenticator(channel.clone(), store.clone());
        let outcome = auth.authenticate().await.unwrap();

        assert_eq!(outcome, AuthOutcome::Authenticated);
        assert_eq!(
            channel.methods(),
            vec!["auth_info", "pair", "auth_info", "authenticate"]
        );
        assert_eq!(store.get_secret(DEVICE).unwrap().as_bytes(), &[9; 32]);

        let requests = channel.requests.lock().unwrap().clone();
        assert_eq!(
            requests[3].args[1],
            Value::from(&sign_challenge(&[9; 32], b"after")[..])
        );
    }

    #[tokio::test]
    async fn not_pairable_without_secret() {
        let store = Arc::new(SecretStore::in_memory());
        let channel = Arc::new(ScriptedAuthChannel::default());
        channel.push_info(b"c", false);

        let auth = authenticator(channel.clone(), store);
        assert_eq!(
            auth.authenticate().await.unwrap(),
            AuthOutcome::PairingUnavailable
        );
        assert_eq!(channel.methods(), vec!["auth_info"]);
    }

    #[tokio::test]
    async fn rejection_deletes_secret() {
        let store = Arc::new(SecretStore::in_memory());
        store.set_secret(DEVICE, Some(&[1; 32])).unwrap();
        let channel = Arc::new(ScriptedAuthChannel::default());
        channel.push_info(b"c", true).push(true, Value::Bool(false));

        let auth = authenticator(channel, store.clone());
        assert_eq!(auth.authenticate().await.unwrap(), AuthOutcome::Rejected);
        assert!(!store.has_secret(DEVICE));
    }

    #[tokio::test]
    async fn empty_pairing_secret_is_not_stored() {
        let store = Arc::new(SecretStore::in_memory());
        let channel = Arc::new(ScriptedAuthChannel::default());
        channel
            .push_info(b"c", true)
            .push(true, Value::from(""));

        let auth = authenticator(channel, store.clone());
        assert_eq!(
            auth.authenticate().await.unwrap(),
            AuthOutcome::PairingUnavailable
        );
        assert!(store.device_ids().is_empty());
    }

    #[tokio::test]
    async fn malformed_auth_info_is_error() {
        let store = Arc::new(SecretStore::in_memory());
        let channel = Arc::new(ScriptedAuthChannel::default());
        channel.push(true, Value::Bool(true));

        let auth = authenticator(channel, store);
        let err = auth.authenticate().await.expect_err("bad payload should fail");
        assert!(matches!(err, ClientError::UnexpectedResult { .. }));
    }

    #[tokio::test]
    async fn remote_error_propagates() {
        let store = Arc::new(SecretStore::in_memory());
        let channel = Arc::new(ScriptedAuthChannel::default());
        channel.push(false, Value::from("busy"));

        let auth = authenticator(channel, store);
        let err = auth.authenticate().await.expect_err("rpc error should fail");
        assert_eq!(err.to_string(), "RPC Error: busy");
    }
}
