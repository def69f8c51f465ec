//! Remote [`LocalStorage`] backed by a Redis server.
//!
//! Each `set` is one `SET` command against the server, so durability is
//! whatever the server is configured for. Keys are namespaced with a
//! prefix so several processes can share one instance.

use parking_lot::Mutex;
use redis::Commands;

use datalink_core::Error;

use super::LocalStorage;

/// Remote storage over a Redis connection.
pub struct RedisStorage {
    url: String,
    prefix: String,
    conn: Mutex<Option<redis::Connection>>,
}

impl RedisStorage {
    /// Creates a storage for the given server URL
    /// (e.g. `redis://127.0.0.1/`). Call [`LocalStorage::load`] to connect.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            prefix: "datalink:".to_string(),
            conn: Mutex::new(None),
        }
    }

    /// Overrides the key prefix (default `datalink:`).
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn storage_err(action: &str, err: impl std::fmt::Display) -> Error {
        Error::Storage(format!("redis {action}: {err}"))
    }
}

impl LocalStorage for RedisStorage {
    fn load(&self) -> Result<(), Error> {
        let mut conn = self.conn.lock();
        if conn.is_some() {
            return Ok(());
        }
        let client =
            redis::Client::open(self.url.as_str()).map_err(|e| Self::storage_err("open", e))?;
        *conn = Some(
            client
                .get_connection()
                .map_err(|e| Self::storage_err("connect", e))?,
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        let mut conn = self.conn.lock();
        let Some(conn) = conn.as_mut() else {
            return Err(Error::Storage("redis storage is not connected".to_string()));
        };

        let bytes: Option<Vec<u8>> = conn
            .get(self.namespaced(key))
            .map_err(|e| Self::storage_err("get", e))?;
        match bytes {
            Some(bytes) => {
                let value =
                    serde_json::from_slice(&bytes).map_err(|e| Self::storage_err("decode", e))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), Error> {
        let bytes = serde_json::to_vec(&value).map_err(|e| Self::storage_err("encode", e))?;

        let mut conn = self.conn.lock();
        let Some(conn) = conn.as_mut() else {
            return Err(Error::Storage("redis storage is not connected".to_string()));
        };

        conn.set::<_, _, ()>(self.namespaced(key), bytes)
            .map_err(|e| Self::storage_err("set", e))
    }
}
