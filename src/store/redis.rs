//! Redis-backed store.
//!
//! Lists hold queued payloads (RPUSH / BLPOP / BRPOP); hashes hold worker
//! records. Hash batches go through a MULTI/EXEC pipeline so a reader never
//! sees half of a status change.

use super::{End, HashOp, Store};
use crate::config::StoreInstance;
use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, IntoConnectionInfo, RedisError};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Store handle owning one authenticated session with a selected database.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    addr: String,
}

impl RedisStore {
    /// Connect to an instance: open the session, select the database,
    /// authenticate when a password is configured, then PING.
    ///
    /// Every failure here is an [`Error::Handshake`].
    pub async fn connect(instance: &StoreInstance) -> Result<Self> {
        let addr = instance.addr();
        let handshake = |source: RedisError| Error::Handshake {
            addr: addr.clone(),
            source,
        };

        let mut info = (instance.host.clone(), instance.port)
            .into_connection_info()
            .map_err(handshake)?;
        info.redis.db = instance.db;
        info.redis.password = instance.password().map(str::to_string);

        let client = Client::open(info).map_err(handshake)?;
        Self::establish(client, addr.clone()).await
    }

    /// Connect from a `redis://` URL.
    pub async fn connect_url(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|source| Error::Handshake {
            addr: url.to_string(),
            source,
        })?;
        Self::establish(client, url.to_string()).await
    }

    async fn establish(client: Client, addr: String) -> Result<Self> {
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|source| Error::Handshake {
                addr: addr.clone(),
                source,
            })?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|source| Error::Handshake {
                addr: addr.clone(),
                source,
            })?;
        debug!(%addr, "store session established");
        Ok(Self { conn, addr })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

/// BLPOP/BRPOP timeout argument. Redis rejects waits beyond its millisecond
/// range, so those become 0, which blocks until a push.
fn block_secs(timeout: Duration) -> f64 {
    let secs = timeout.as_secs_f64();
    if secs * 1000.0 >= i64::MAX as f64 { 0.0 } else { secs }
}

/// Payloads are opaque bytes to producers. Invalid UTF-8 is replaced
/// rather than rejected so the task still reaches the action.
fn decode_payload(key: &str, bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(key, len = e.as_bytes().len(), "payload is not valid UTF-8, replacing invalid bytes");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> Result<()> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        let len: usize = self.conn().rpush(key, value).await?;
        Ok(len)
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let len: usize = self.conn().llen(key).await?;
        Ok(len)
    }

    async fn bpop(&self, key: &str, end: End, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.conn();
        let secs = block_secs(timeout);
        // Reply is (key, element) or nil on timeout. Read raw bytes: the
        // element is already gone from the list once the reply arrives.
        let popped: Option<(Vec<u8>, Vec<u8>)> = match end {
            End::Left => conn.blpop(key, secs).await?,
            End::Right => conn.brpop(key, secs).await?,
        };
        Ok(popped.map(|(_, value)| decode_payload(key, value)))
    }

    async fn apply(&self, key: &str, ops: &[HashOp]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                HashOp::Set(field, value) => {
                    pipe.hset(key, field, value).ignore();
                }
                HashOp::Incr(field, delta) => {
                    pipe.hincr(key, field, *delta).ignore();
                }
            }
        }
        let () = pipe.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let fields: HashMap<String, String> = self.conn().hgetall(key).await?;
        Ok(fields)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let value: Option<String> = self.conn().hget(key, field).await?;
        Ok(value)
    }
}
