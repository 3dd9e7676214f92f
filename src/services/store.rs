//! Session/container state storage.
//!
//! Two logical maps: session key -> container status, and
//! `"{containerID}:{filename}"` -> data file contents. The reference
//! backend is in-process; a distributed cache backend can implement the
//! same trait and be selected by configuration presence.

use crate::infra::error::{SigaError, SigaResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// The state of one open container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    /// Container identifier assigned by SiGa.
    pub container_id: String,
    /// Names of the data files currently in the container, in order.
    pub filenames: Vec<String>,
    /// Identifier of the in-flight signature; empty when no signing
    /// ceremony is outstanding.
    pub signature_id: String,
}

/// Key of a stored data file blob.
pub(crate) fn data_key(container_id: &str, filename: &str) -> String {
    format!("{container_id}:{filename}")
}

/// Storage for the state of open containers.
///
/// Put/get/remove on the same key are linearizable; distinct keys may be
/// mutated concurrently. Methods are synchronous: the reference backend
/// never blocks, and a remote backend may block the calling thread the way
/// a cache client would.
pub trait SessionStore: Send + Sync {
    fn put_status(&self, session: &str, status: SessionStatus) -> SigaResult<()>;
    /// The status of a session, or `None` when no container is open.
    fn status(&self, session: &str) -> SigaResult<Option<SessionStatus>>;
    fn remove_status(&self, session: &str) -> SigaResult<()>;

    fn put_data(&self, key: &str, contents: Vec<u8>) -> SigaResult<()>;
    fn data(&self, key: &str) -> SigaResult<Vec<u8>>;
    fn remove_data(&self, key: &str) -> SigaResult<()>;

    /// Release any resources held by the store.
    fn close(&self) -> SigaResult<()>;
}

/// In-process [`SessionStore`] backed by two lock-guarded maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    status: RwLock<HashMap<String, SessionStatus>>,
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> SigaError {
    SigaError::Internal("session store lock poisoned".into())
}

impl SessionStore for MemoryStore {
    fn put_status(&self, session: &str, status: SessionStatus) -> SigaResult<()> {
        log::debug!(
            "put status: session={session} container={} signature={}",
            status.container_id,
            status.signature_id
        );
        self.status
            .write()
            .map_err(|_| poisoned())?
            .insert(session.to_string(), status);
        Ok(())
    }

    fn status(&self, session: &str) -> SigaResult<Option<SessionStatus>> {
        Ok(self.status.read().map_err(|_| poisoned())?.get(session).cloned())
    }

    fn remove_status(&self, session: &str) -> SigaResult<()> {
        self.status.write().map_err(|_| poisoned())?.remove(session);
        Ok(())
    }

    fn put_data(&self, key: &str, contents: Vec<u8>) -> SigaResult<()> {
        log::debug!("put data: key={key} size={}", contents.len());
        self.data
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), contents);
        Ok(())
    }

    fn data(&self, key: &str) -> SigaResult<Vec<u8>> {
        self.data
            .read()
            .map_err(|_| poisoned())?
            .get(key)
            .cloned()
            .ok_or_else(|| SigaError::NotFound(format!("no data for {key}")))
    }

    fn remove_data(&self, key: &str) -> SigaResult<()> {
        self.data.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    fn close(&self) -> SigaResult<()> {
        Ok(())
    }
}
