use std::sync::Arc;

use gattrpc_frame::{MessageTransport, SerialQueue};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::value::Value;

/// Request envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub args: Vec<Value>,
}

/// Response envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub ok: bool,
    #[serde(default)]
    pub result: Value,
}

#[derive(Serialize)]
struct RequestRef<'a> {
    method: &'a str,
    args: &'a [Value],
}

/// Encode a `{method, args}` request as a MessagePack map.
pub fn encode_request(method: &str, args: &[Value]) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(&RequestRef { method, args })?)
}

/// Decode an `{ok, result}` response.
pub fn decode_response(bytes: &[u8]) -> Result<RpcResponse> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Correlates RPC calls with responses over a message transport.
///
/// Calls are chained: each one starts after the previous one settled,
/// whatever its outcome.
pub struct RpcCaller<T: ?Sized> {
    transport: Arc<T>,
    queue: SerialQueue,
}

impl<T: MessageTransport + ?Sized> RpcCaller<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            queue: SerialQueue::new(),
        }
    }

    /// Invoke `method` with `args` and return its result.
    ///
    /// A response with `ok: false` becomes [`ClientError::Rpc`] carrying the
    /// remote result as detail.
    pub async fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        self.queue.run(self.exchange(method, args)).await
    }

    async fn exchange(&self, method: &str, args: &[Value]) -> Result<Value> {
        let request = encode_request(method, args)?;
        tracing::debug!(method, size = request.len(), "rpc call");

        let response = self.transport.send(&request).await?;
        let envelope = decode_response(&response)?;
        if !envelope.ok {
            tracing::debug!(method, detail = %envelope.result, "rpc call failed");
            return Err(ClientError::Rpc {
                method: method.to_string(),
                detail: envelope.result,
            });
        }
        Ok(envelope.result)
    }
}

impl<T: ?Sized> std::fmt::Debug for RpcCaller<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcCaller")
            .field("idle", &self.queue.is_idle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use gattrpc_frame::FrameError;

    use super::*;

    #[derive(Default)]
    struct MockTransport {
        responses: Mutex<VecDeque<gattrpc_frame::Result<Bytes>>>,
        sent: Mutex<Vec<Vec<u8>>>,
        delay: Option<Duration>,
    }

    impl MockTransport {
        fn respond(&self, ok: bool, result: Value) {
            let bytes = rmp_serde::to_vec_named(&RpcResponse { ok, result }).unwrap();
            self.responses
                .lock()
                .unwrap()
                .push_back(Ok(Bytes::from(bytes)));
        }

        fn sent_requests(&self) -> Vec<RpcRequest> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|b| rmp_serde::from_slice(b).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl MessageTransport for MockTransport {
        async fn send(&self, message: &[u8]) -> gattrpc_frame::Result<Bytes> {
            self.sent.lock().unwrap().push(message.to_vec());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(FrameError::EmptyResponse))
        }
    }

    #[test]
    fn request_is_a_named_map() {
        let bytes = encode_request("add", &[Value::Int(1), Value::Int(2)]).unwrap();
        // fixmap with two entries, first key "method"
        assert_eq!(bytes[0], 0x82);
        assert_eq!(&bytes[1..8], b"\xa6method");

        let decoded: RpcRequest = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded.method, "add");
        assert_eq!(decoded.args, vec![Value::Int(1), Value::Int(2)]);
    }

    #[tokio::test]
    async fn successful_call_returns_result() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(true, Value::Int(3));
        let caller = RpcCaller::new(transport.clone());

        let result = caller
            .call("add", &[Value::Int(1), Value::Int(2)])
            .await
            .expect("call should succeed");

        assert_eq!(result, Value::Int(3));
        assert_eq!(transport.sent_requests()[0].method, "add");
    }

    #[tokio::test]
    async fn failed_call_carries_remote_detail() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(false, Value::from("Unknown method"));
        let caller = RpcCaller::new(transport);

        let err = caller.call("nope", &[]).await.expect_err("call should fail");
        assert_eq!(err.to_string(), "RPC Error: Unknown method");
        assert!(matches!(err, ClientError::Rpc { ref method, .. } if method == "nope"));
        assert!(!err.is_disconnected());
    }

    #[tokio::test]
    async fn unicode_and_empty_args() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(true, Value::from("héllo 世界 🌍"));
        transport.respond(true, Value::Nil);
        let caller = RpcCaller::new(transport.clone());

        let echoed = caller
            .call("echo", &[Value::from("héllo 世界 🌍")])
            .await
            .unwrap();
        assert_eq!(echoed.as_str(), Some("héllo 世界 🌍"));

        let nil = caller.call("ping", &[]).await.unwrap();
        assert!(nil.is_nil());
        assert!(transport.sent_requests()[1].args.is_empty());
    }

    #[tokio::test]
    async fn garbage_response_is_decode_error() {
        let transport = Arc::new(MockTransport::default());
        transport
            .responses
            .lock()
            .unwrap()
            .push_back(Ok(Bytes::from_static(b"\xc1")));
        let caller = RpcCaller::new(transport);

        let err = caller.call("x", &[]).await.expect_err("decode should fail");
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn calls_settle_in_order_and_failures_do_not_poison() {
        let transport = Arc::new(MockTransport {
            delay: Some(Duration::from_millis(20)),
            ..MockTransport::default()
        });
        transport
            .responses
            .lock()
            .unwrap()
            .push_back(Err(FrameError::SizeOverflow));
        transport.respond(true, Value::from("b"));
        let caller = RpcCaller::new(transport.clone());

        let (a, b) = tokio::join!(caller.call("a", &[]), caller.call("b", &[]));

        assert!(matches!(a, Err(ClientError::Frame(FrameError::SizeOverflow))));
        assert_eq!(b.unwrap(), Value::from("b"));
        let methods: Vec<String> = transport
            .sent_requests()
            .into_iter()
            .map(|r| r.method)
            .collect();
        assert_eq!(methods, vec!["a", "b"]);
    }
}
