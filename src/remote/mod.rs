//! Remote RPC transport.
//!
//! The remote is one JSON-RPC-style endpoint: POST `{method, args, kwargs}`,
//! answered by `{success: true, result}` or `{success: false, error,
//! message?}`. Everything above this module talks to the typed adapter in
//! [`api`]; everything below it is a single `call` seam so tests can script
//! a mock transport.

pub mod api;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::RemoteError;

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Invoke a named remote method with keyword arguments.
    async fn call(&self, method: &str, kwargs: Value) -> Result<Value, RemoteError>;
}

/// HTTP implementation of the transport.
pub struct RpcClient {
    http: reqwest::Client,
    api_base: String,
}

impl RpcClient {
    pub fn new(api_base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.to_string(),
        }
    }
}

#[async_trait]
impl RemoteTransport for RpcClient {
    async fn call(&self, method: &str, kwargs: Value) -> Result<Value, RemoteError> {
        let body = json!({
            "method": method,
            "args": [],
            "kwargs": kwargs,
        });

        tracing::debug!(method, "rpc call");
        let resp = self
            .http
            .post(&self.api_base)
            .json(&body)
            .send()
            .await
            .map_err(RemoteError::from)?;

        let envelope: Value = resp.json().await.map_err(RemoteError::from)?;
        unwrap_envelope(envelope)
    }
}

/// Split the response envelope into result or business error.
pub(crate) fn unwrap_envelope(envelope: Value) -> Result<Value, RemoteError> {
    match envelope.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(envelope.get("result").cloned().unwrap_or(Value::Null)),
        Some(false) => {
            let message = envelope
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| envelope.get("error").and_then(Value::as_str))
                .unwrap_or("remote error");
            Err(RemoteError::Api(message.to_string()))
        }
        None => Err(RemoteError::Malformed(
            "response missing success field".to_string(),
        )),
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted transport for facade and sync tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    pub struct RecordedCall {
        pub method: String,
        pub kwargs: Value,
    }

    /// Responds to calls from a scripted queue, recording every request.
    /// An empty script answers with `Value::Null`. Scripted values may be
    /// raw results or full `{success, result}` envelopes; envelopes are
    /// unwrapped the way the HTTP client unwraps them.
    #[derive(Default)]
    pub struct MockTransport {
        pub calls: Mutex<Vec<RecordedCall>>,
        script: Mutex<VecDeque<Result<Value, RemoteError>>>,
        /// When set, every call fails with a transport error.
        pub unreachable: Mutex<bool>,
        /// Yield to the scheduler this many times before answering, so
        /// tests can interleave concurrent callers.
        yields: Mutex<u32>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_yield(&self, yields: u32) {
            *self.yields.lock().unwrap() = yields;
        }

        pub fn push_ok(&self, value: Value) {
            self.script.lock().unwrap().push_back(Ok(value));
        }

        pub fn push_err(&self, err: RemoteError) {
            self.script.lock().unwrap().push_back(Err(err));
        }

        pub fn set_unreachable(&self, unreachable: bool) {
            *self.unreachable.lock().unwrap() = unreachable;
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn methods(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.method.clone())
                .collect()
        }

        pub fn kwargs_of(&self, index: usize) -> Value {
            self.calls.lock().unwrap()[index].kwargs.clone()
        }
    }

    #[async_trait]
    impl RemoteTransport for MockTransport {
        async fn call(&self, method: &str, kwargs: Value) -> Result<Value, RemoteError> {
            let yields = *self.yields.lock().unwrap();
            for _ in 0..yields {
                tokio::task::yield_now().await;
            }
            if *self.unreachable.lock().unwrap() {
                return Err(RemoteError::Transport("connection refused".to_string()));
            }
            self.calls.lock().unwrap().push(RecordedCall {
                method: method.to_string(),
                kwargs,
            });
            let scripted = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Value::Null));
            scripted.and_then(|value| {
                // A scripted wire envelope gets the same treatment the
                // real transport applies; plain results pass through.
                let is_envelope = match value.get("success").and_then(Value::as_bool) {
                    Some(true) => value.get("result").is_some(),
                    Some(false) => value.get("error").is_some_and(Value::is_string),
                    None => false,
                };
                if is_envelope {
                    unwrap_envelope(value)
                } else {
                    Ok(value)
                }
            })
        }
    }
}
