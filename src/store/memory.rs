//! In-memory store implementation for testing
//!
//! Behaves like a single always-consistent replica set. Availability can be
//! toggled to mimic the daemon being down, and every connect is recorded so
//! tests can check which descriptors were used.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{Connector, DataStore, WriteRecord};
use crate::error::{HarnessError, Result};
use crate::topology::ConnectionDescriptor;

#[derive(Debug, Default)]
struct MemoryState {
    collections: BTreeMap<String, Vec<WriteRecord>>,
    log: Vec<String>,
    available: bool,
    connections: Vec<String>,
    undroppable: BTreeSet<String>,
}

/// Shared in-memory cluster contents
///
/// Clones share state, so a clone handed to a simulated writer sees the same
/// documents as the harness.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty, available store
    pub fn new() -> Self {
        MemoryStore {
            state: Arc::new(Mutex::new(MemoryState {
                available: true,
                ..MemoryState::default()
            })),
        }
    }

    /// Simulate the daemon going down (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    pub fn is_available(&self) -> bool {
        self.state.lock().available
    }

    /// Replace the server log returned by `log_lines`
    pub fn set_log(&self, lines: Vec<String>) {
        self.state.lock().log = lines;
    }

    /// Insert a record directly, bypassing availability
    pub fn seed(&self, collection: &str, record: WriteRecord) {
        self.state
            .lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(record);
    }

    /// Make every drop of `collection` fail
    pub fn fail_drops_of(&self, collection: &str) {
        self.state.lock().undroppable.insert(collection.to_string());
    }

    /// Names of collections that currently exist
    pub fn collection_names(&self) -> Vec<String> {
        self.state.lock().collections.keys().cloned().collect()
    }

    /// Redacted URIs of every connection opened so far
    pub fn connections(&self) -> Vec<String> {
        self.state.lock().connections.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.state.lock().available {
            Ok(())
        } else {
            Err(HarnessError::Connectivity("no reachable member".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn count_by_scan(&self, collection: &str) -> Result<u64> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state
            .collections
            .get(collection)
            .map_or(0, |records| records.len() as u64))
    }

    async fn find_max_number(&self, collection: &str) -> Result<Option<WriteRecord>> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state
            .collections
            .get(collection)
            .and_then(|records| records.iter().max_by_key(|r| r.number))
            .cloned())
    }

    async fn insert(&self, collection: &str, record: &WriteRecord) -> Result<()> {
        self.check_available()?;
        self.seed(collection, record.clone());
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        if state.undroppable.contains(collection) {
            return Err(HarnessError::Connectivity(format!("drop of {} failed", collection)));
        }
        state.collections.remove(collection);
        Ok(())
    }

    async fn log_lines(&self) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(self.state.lock().log.clone())
    }
}

/// Connector handing out clones of one [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        MemoryConnector { store }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        _database: &str,
    ) -> Result<Box<dyn DataStore>> {
        self.store
            .state
            .lock()
            .connections
            .push(descriptor.redacted_uri());
        Ok(Box::new(self.store.clone()))
    }
}
