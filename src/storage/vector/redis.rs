//! Redis-based vector backend.
//!
//! Vector similarity search on Redis Stack (`RediSearch` 2.4+). One HNSW
//! index per scheme, each bound to the scheme's key prefix.
//!
//! # Redis Commands Used
//!
//! | Operation | Redis Command | Description |
//! |-----------|---------------|-------------|
//! | Create Index | `FT.INFO`, `FT.CREATE` | HNSW index with the scheme's DIM and metric |
//! | Upsert | `HSET` | Stores the vector as a FLOAT32 LE blob |
//! | Get | `HGET` | Reads the blob back |
//! | Search | `FT.SEARCH ... KNN` | Nearest neighbors, ascending by distance |
//! | Remove | `DEL` | Deletes the hash key |
//! | List | `SCAN MATCH prefix*` | Enumerates a scheme's keys |
//! | Count | `FT.INFO` | Reads `num_docs` |
//!
//! # Key Layout
//!
//! `{key_prefix}{template_id}`, a hash with a single `vector` field. For
//! the 16-dimension scheme that is `fingerprint:<sha256 hex>`.
//!
//! # Thread Safety
//!
//! The connection is cached in a `Mutex` and reused across operations, so
//! the backend can be shared via `Arc<dyn VectorBackend>`. Failures are
//! returned as [`Error::Store`] and never retried here.

use super::reply::{SCORE_FIELD, SearchReply, info_num_docs};
use crate::models::{Scheme, SchemeId, TemplateId};
use crate::storage::traits::{VectorBackend, check_dimension};
use crate::{Error, Result};
use redis::{Client, Commands, Connection, RedisResult};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// Hash field holding the vector blob.
const VECTOR_FIELD: &str = "vector";

/// `SCAN` page size.
const SCAN_COUNT: usize = 500;

/// Redis-based vector backend using `RediSearch` Vector Similarity Search.
pub struct RedisVectorBackend {
    /// Redis connection URL.
    connection_url: String,
    /// Redis client.
    client: Client,
    /// Cached connection for reuse.
    connection: Mutex<Option<Connection>>,
    /// Schemes whose index is known to exist.
    indexed: Mutex<HashSet<SchemeId>>,
    /// Read/write timeout applied to new connections.
    timeout: Duration,
}

impl RedisVectorBackend {
    /// Default operation timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a new Redis vector backend.
    ///
    /// No connection is opened until the first operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not a valid Redis URL.
    pub fn new(connection_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let connection_url = connection_url.into();
        let client =
            Client::open(connection_url.as_str()).map_err(|e| Error::store("redis_connect", e))?;

        Ok(Self {
            connection_url,
            client,
            connection: Mutex::new(None),
            indexed: Mutex::new(HashSet::new()),
            timeout,
        })
    }

    /// Returns the connection URL.
    #[must_use]
    pub fn connection_url(&self) -> &str {
        &self.connection_url
    }

    /// Checks that the server answers `PING`.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be established.
    pub fn health_check(&self) -> Result<bool> {
        self.with_connection("ping", |conn| {
            let pong: RedisResult<String> = redis::cmd("PING").query(conn);
            Ok(pong.is_ok_and(|response| response == "PONG"))
        })
    }

    fn key(scheme: &Scheme, id: &TemplateId) -> String {
        format!("{}{}", scheme.key_prefix, id.as_str())
    }

    fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
        vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn bytes_to_vector(scheme: &Scheme, bytes: &[u8]) -> Result<Vec<f32>> {
        if bytes.len() != scheme.dimension * 4 {
            return Err(Error::store(
                "get",
                format!(
                    "stored blob has {} bytes, expected {}",
                    bytes.len(),
                    scheme.dimension * 4
                ),
            ));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Gets a connection, reusing the cached one if available.
    fn get_connection(&self) -> Result<Connection> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|e| Error::store("redis_lock_connection", e))?;
        if let Some(conn) = guard.take() {
            return Ok(conn);
        }
        drop(guard);

        let conn = self
            .client
            .get_connection()
            .map_err(|e| Error::store("redis_get_connection", e))?;
        conn.set_read_timeout(Some(self.timeout))
            .map_err(|e| Error::store("redis_set_read_timeout", e))?;
        conn.set_write_timeout(Some(self.timeout))
            .map_err(|e| Error::store("redis_set_write_timeout", e))?;
        Ok(conn)
    }

    /// Returns a connection to the cache for reuse.
    fn return_connection(&self, conn: Connection) {
        if let Ok(mut guard) = self.connection.lock() {
            *guard = Some(conn);
        }
    }

    /// Runs `f` on a pooled connection. The connection is only returned to
    /// the cache when `f` succeeds, so a broken socket is not reused.
    fn with_connection<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.get_connection()?;
        let result = f(&mut conn);
        if result.is_ok() {
            self.return_connection(conn);
        } else {
            tracing::debug!(operation, "dropping redis connection after failure");
        }
        result
    }

    fn mark_indexed(&self, scheme: SchemeId) {
        if let Ok(mut guard) = self.indexed.lock() {
            guard.insert(scheme);
        }
    }

    fn is_indexed(&self, scheme: SchemeId) -> bool {
        self.indexed
            .lock()
            .map(|guard| guard.contains(&scheme))
            .unwrap_or(false)
    }

    fn create_index(scheme: &Scheme, conn: &mut Connection) -> Result<()> {
        let info: RedisResult<redis::Value> =
            redis::cmd("FT.INFO").arg(scheme.index_name).query(conn);
        if info.is_ok() {
            return Ok(());
        }

        let created: RedisResult<()> = redis::cmd("FT.CREATE")
            .arg(scheme.index_name)
            .arg("ON")
            .arg("HASH")
            .arg("PREFIX")
            .arg("1")
            .arg(scheme.key_prefix)
            .arg("SCHEMA")
            .arg(VECTOR_FIELD)
            .arg("VECTOR")
            .arg("HNSW")
            .arg("6")
            .arg("TYPE")
            .arg("FLOAT32")
            .arg("DIM")
            .arg(scheme.dimension)
            .arg("DISTANCE_METRIC")
            .arg(scheme.metric.redis_name())
            .query(conn);

        match created {
            Ok(()) => {
                tracing::info!(scheme = %scheme.id, index = scheme.index_name, "created vector index");
                Ok(())
            },
            Err(e) if e.to_string().contains("Index already exists") => Ok(()),
            Err(e) => Err(Error::store("create_index", e)),
        }
    }

    /// Parses a KNN reply into template ids, rejecting keys outside the
    /// scheme's prefix.
    fn parse_hits(scheme: &Scheme, value: &redis::Value) -> Result<Vec<(TemplateId, f32)>> {
        let reply = SearchReply::decode(value)?;
        reply
            .hits
            .into_iter()
            .map(|hit| {
                let id = hit.key.strip_prefix(scheme.key_prefix).ok_or_else(|| {
                    Error::store(
                        "knn_query",
                        format!("key '{}' outside index '{}'", hit.key, scheme.index_name),
                    )
                })?;
                Ok((TemplateId::new(id), hit.score))
            })
            .collect()
    }
}

impl VectorBackend for RedisVectorBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn ensure_index(&self, scheme: &Scheme) -> Result<()> {
        if self.is_indexed(scheme.id) {
            return Ok(());
        }
        self.with_connection("ensure_index", |conn| Self::create_index(scheme, conn))?;
        self.mark_indexed(scheme.id);
        Ok(())
    }

    fn upsert(&self, scheme: &Scheme, id: &TemplateId, vector: &[f32]) -> Result<()> {
        check_dimension(scheme, "upsert", vector)?;
        self.ensure_index(scheme)?;

        let key = Self::key(scheme, id);
        let blob = Self::vector_to_bytes(vector);
        self.with_connection("upsert", |conn| {
            conn.hset::<_, _, _, ()>(&key, VECTOR_FIELD, blob.as_slice())
                .map_err(|e| Error::store("upsert", e))
        })
    }

    fn get(&self, scheme: &Scheme, id: &TemplateId) -> Result<Option<Vec<f32>>> {
        let key = Self::key(scheme, id);
        let blob = self.with_connection("get", |conn| {
            conn.hget::<_, _, Option<Vec<u8>>>(&key, VECTOR_FIELD)
                .map_err(|e| Error::store("get", e))
        })?;
        blob.map(|bytes| Self::bytes_to_vector(scheme, &bytes))
            .transpose()
    }

    fn contains(&self, scheme: &Scheme, id: &TemplateId) -> Result<bool> {
        let key = Self::key(scheme, id);
        self.with_connection("contains", |conn| {
            conn.exists::<_, bool>(&key)
                .map_err(|e| Error::store("contains", e))
        })
    }

    fn remove(&self, scheme: &Scheme, id: &TemplateId) -> Result<bool> {
        let key = Self::key(scheme, id);
        self.with_connection("remove", |conn| {
            conn.del::<_, i64>(&key)
                .map(|deleted| deleted > 0)
                .map_err(|e| Error::store("remove", e))
        })
    }

    fn nearest(&self, scheme: &Scheme, query: &[f32], k: usize) -> Result<Vec<(TemplateId, f32)>> {
        check_dimension(scheme, "knn_query", query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        self.ensure_index(scheme)?;

        let blob = Self::vector_to_bytes(query);
        let knn = format!("*=>[KNN {k} @{VECTOR_FIELD} $query_vector AS {SCORE_FIELD}]");
        let value = self.with_connection("knn_query", |conn| {
            redis::cmd("FT.SEARCH")
                .arg(scheme.index_name)
                .arg(&knn)
                .arg("PARAMS")
                .arg("2")
                .arg("query_vector")
                .arg(blob.as_slice())
                .arg("SORTBY")
                .arg(SCORE_FIELD)
                .arg("ASC")
                .arg("RETURN")
                .arg("1")
                .arg(SCORE_FIELD)
                .arg("LIMIT")
                .arg("0")
                .arg(k)
                .arg("DIALECT")
                .arg("2")
                .query::<redis::Value>(conn)
                .map_err(|e| Error::store("knn_query", e))
        })?;

        Self::parse_hits(scheme, &value)
    }

    fn ids(&self, scheme: &Scheme) -> Result<Vec<TemplateId>> {
        let pattern = format!("{}*", scheme.key_prefix);
        self.with_connection("scan", |conn| {
            let mut cursor: u64 = 0;
            let mut ids = Vec::new();
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query(conn)
                    .map_err(|e| Error::store("scan", e))?;
                ids.extend(
                    keys.iter()
                        .filter_map(|key| key.strip_prefix(scheme.key_prefix))
                        .map(TemplateId::new),
                );
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            ids.sort();
            ids.dedup();
            Ok(ids)
        })
    }

    fn count(&self, scheme: &Scheme) -> Result<usize> {
        self.with_connection("count", |conn| {
            let info: RedisResult<redis::Value> =
                redis::cmd("FT.INFO").arg(scheme.index_name).query(conn);
            match info {
                Ok(value) => Ok(info_num_docs(&value)?),
                Err(e) if e.to_string().to_lowercase().contains("unknown index") => Ok(0),
                Err(e) => Err(Error::store("count", e)),
            }
        })
    }
}
