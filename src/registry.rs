/*!
Process-wide association registry.

The registry maps association ids to live [`Association`]s and is the
synchronization point that makes late engine callbacks safe: an engine
thread holding only an id upgrades it here, under the registry lock,
before touching any association state. Disposal removes the id and
releases the engine-side resources under the same lock, so a callback
arriving after disposal fails the lookup and touches nothing.

Engine-wide setup is keyed by the number of live associations: the
first [`get_or_create`] initializes the engine and the last
[`dispose`] tears it down.

The registry lock is never held concurrently with an association
lock.

[`get_or_create`]: AssociationRegistry::get_or_create
[`dispose`]: AssociationRegistry::dispose
*/

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::association::Association;
use crate::engine::TransportEngine;
use crate::types::AssociationId;

struct RegistryInner {
    by_id: HashMap<AssociationId, Arc<Association>>,
    /// Live-association count driving engine init/finish
    live: usize,
}

/// Registry of live associations, one per process
pub struct AssociationRegistry {
    engine: Arc<dyn TransportEngine>,
    inner: Mutex<RegistryInner>,
}

impl AssociationRegistry {
    /// Create a registry backed by the given engine. The embedding
    /// application typically owns exactly one.
    pub fn new(engine: Arc<dyn TransportEngine>) -> Self {
        Self {
            engine,
            inner: Mutex::new(RegistryInner { by_id: HashMap::new(), live: 0 }),
        }
    }

    /// Return the association with the given id, creating it if no
    /// live one exists. Concurrent callers for one id all receive the
    /// same instance.
    pub fn get_or_create(&self, id: AssociationId) -> Arc<Association> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.by_id.get(&id) {
            return Arc::clone(existing);
        }

        if inner.live == 0 {
            self.engine.init();
        }
        inner.live += 1;
        self.engine.register_address(id);

        let assoc = Association::new(id, Arc::clone(&self.engine));
        inner.by_id.insert(id, Arc::clone(&assoc));
        debug!(id, "association created");
        assoc
    }

    /// Look up a live association without creating one
    pub fn lookup(&self, id: AssociationId) -> Option<Arc<Association>> {
        self.inner.lock().by_id.get(&id).cloned()
    }

    /// Whether the id names a live association
    pub fn is_valid(&self, id: AssociationId) -> bool {
        self.inner.lock().by_id.contains_key(&id)
    }

    /// Number of live associations
    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_id.is_empty()
    }

    /// Remove the association from the registry and release its
    /// engine-side resources.
    ///
    /// Deregistration happens under the registry lock, before the
    /// engine teardown, so an engine callback racing this call either
    /// finds the association still valid or finds nothing at all. The
    /// connection worker, if outstanding, is joined after the lock is
    /// released.
    pub fn dispose(&self, id: AssociationId) {
        let assoc = {
            let mut inner = self.inner.lock();
            let Some(assoc) = inner.by_id.remove(&id) else {
                return;
            };
            self.engine.deregister_address(id);
            inner.live -= 1;
            if inner.live == 0 {
                self.engine.finish();
            }
            assoc
        };

        debug!(id, "association disposed");
        assoc.join_worker();
    }
}
