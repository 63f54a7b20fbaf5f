//! Scripted transport shared by the unit tests.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Notify;

use crate::api::{ApiError, ApiRequest, ApiResponse, Transport};
use crate::auth::{CredentialStorage, MemoryStorage, StorageError};
use crate::utils::lock;

pub(crate) enum Reply {
    Ready(Result<ApiResponse, ApiError>),
    /// Held until the `Notify` fires.
    Gated(Arc<Notify>, Result<ApiResponse, ApiError>),
}

type Handler = Box<dyn Fn(&ApiRequest) -> Reply + Send + Sync>;

/// Records every request in the order it was sent and answers from a
/// handler closure.
pub(crate) struct MockTransport {
    handler: Handler,
    calls: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub(crate) fn new(handler: impl Fn(&ApiRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> Vec<ApiRequest> {
        lock(&self.calls).clone()
    }

    pub(crate) fn count(&self, path_suffix: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|r| r.url().ends_with(path_suffix))
            .count()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ApiError>> {
        let reply = (self.handler)(&request);
        lock(&self.calls).push(request);
        async move {
            match reply {
                Reply::Ready(result) => result,
                Reply::Gated(gate, result) => {
                    gate.notified().await;
                    result
                }
            }
        }
        .boxed()
    }
}

pub(crate) fn json(status: u16, body: serde_json::Value) -> Reply {
    Reply::Ready(Ok(ApiResponse::from_json(status, body)))
}

/// A genuine transport-level error without touching the network.
pub(crate) fn network_error() -> ApiError {
    let err = reqwest::Client::new()
        .get("not a url")
        .build()
        .expect_err("invalid URL must fail to build");
    ApiError::from(err)
}

/// Yield until `condition` holds, giving spawned tasks a chance to run.
pub(crate) async fn settle(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

/// Memory storage whose writes can be made to fail.
#[derive(Default)]
pub(crate) struct FlakyStorage {
    inner: MemoryStorage,
    fail_writes: AtomicBool,
}

impl FlakyStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::other("disk full")));
        }
        Ok(())
    }
}

impl CredentialStorage for FlakyStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str, expires_at: DateTime<Utc>) -> Result<(), StorageError> {
        self.check()?;
        self.inner.set(key, value, expires_at)
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        self.check()?;
        self.inner.remove(keys)
    }
}
