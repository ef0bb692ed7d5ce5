//! Memcached ASCII-protocol client.
//!
//! The pipeline only ever issues `set`, so that is all this client speaks.
//! A connection is opened lazily and dropped on any error; the next attempt
//! reconnects. Each call is bounded by the configured timeout.

use async_trait::async_trait;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{ConnectSnafu, InvalidKeySnafu, IoSnafu, NotStoredSnafu, StoreError};

/// Destination key-value store boundary.
///
/// The pipeline is written against this trait so tests can substitute an
/// in-memory implementation for the network client.
#[async_trait]
pub trait Store: Send + Sync {
    /// Store `value` under `key`, overwriting any existing entry.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

pub type StoreRef = Arc<dyn Store>;

/// Memcached client for one destination address.
pub struct MemcacheStore {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<BufStream<TcpStream>>>,
}

impl MemcacheStore {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Run one `set` on an established connection.
    async fn set_on(
        conn: &mut BufStream<TcpStream>,
        key: &str,
        value: &[u8],
    ) -> Result<(), StoreError> {
        let header = format!("set {} 0 0 {}\r\n", key, value.len());
        conn.write_all(header.as_bytes()).await.context(IoSnafu)?;
        conn.write_all(value).await.context(IoSnafu)?;
        conn.write_all(b"\r\n").await.context(IoSnafu)?;
        conn.flush().await.context(IoSnafu)?;

        let mut response = String::new();
        conn.read_line(&mut response).await.context(IoSnafu)?;
        ensure!(
            response.trim_end() == "STORED",
            NotStoredSnafu {
                response: response.trim_end(),
            }
        );
        Ok(())
    }

    async fn set_inner(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;

        // take the connection out; it only goes back after a clean exchange,
        // so an error (or a timeout dropping this future) forces a reconnect
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => {
                let stream = TcpStream::connect(&self.addr)
                    .await
                    .context(ConnectSnafu { addr: &self.addr })?;
                BufStream::new(stream)
            }
        };

        let result = Self::set_on(&mut conn, key, value).await;
        if result.is_ok() {
            *guard = Some(conn);
        }
        result
    }
}

/// Memcached key restrictions: at most 250 bytes, no whitespace or control
/// characters.
fn legal_key(key: &str) -> bool {
    key.len() <= 250 && key.bytes().all(|b| b > b' ' && b != 0x7f)
}

#[async_trait]
impl Store for MemcacheStore {
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        ensure!(legal_key(key), InvalidKeySnafu { key });

        let millis = self.timeout.as_millis() as u64;
        tokio::time::timeout(self.timeout, self.set_inner(key, value))
            .await
            .unwrap_or(Err(StoreError::Timeout { millis }))
    }
}
