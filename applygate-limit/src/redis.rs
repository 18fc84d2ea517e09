//! Redis counter backend.
//!
//! `INCR` + `EXPIRE NX` in an atomic pipeline gives the contract the
//! limiter needs: the TTL is attached once, when the window's first hit
//! creates the key.

use std::future::Future;
use std::pin::Pin;

use redis::aio::ConnectionManager;

use crate::{CounterError, CounterStore};

#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

impl CounterStore for RedisCounterStore {
    fn incr<'a>(
        &'a self,
        key: &'a str,
        ttl_secs: u64,
    ) -> Pin<Box<dyn Future<Output = Result<u64, CounterError>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let mut pipe = redis::pipe();
            pipe.atomic()
                .cmd("INCR")
                .arg(key)
                .cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs)
                .arg("NX")
                .ignore();
            let (value,): (u64,) = pipe
                .query_async(&mut conn)
                .await
                .map_err(|e| CounterError(e.to_string()))?;
            Ok(value)
        })
    }

    fn decr<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CounterError>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            // DECR on a key that expired mid-flight would create a stray
            // negative counter; DECRBY guarded by EXISTS keeps it clean.
            let script = redis::Script::new(
                r#"if redis.call('EXISTS', KEYS[1]) == 1 then
                       return redis.call('DECR', KEYS[1])
                   end
                   return 0"#,
            );
            script
                .key(key)
                .invoke_async::<i64>(&mut conn)
                .await
                .map_err(|e| CounterError(e.to_string()))?;
            Ok(())
        })
    }
}
