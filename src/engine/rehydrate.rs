//! Cache-miss rehydration.
//!
//! The only path that materializes a counter record from nothing outside of
//! explicit creation. Fields are written set-if-absent, so a rehydration
//! racing a faster one never regresses values it already wrote.
//!
//! [`Rehydrator::refresh`] is the forced variant: it overwrites the cached
//! counters and ranking scores with the authoritative values, for when the
//! cache is known to disagree with the system of record.

use crate::engine::adapter::CounterStore;
use crate::engine::dispatch::Dispatcher;
use crate::engine::lifecycle::{RecordState, Transition};
use crate::engine::repository::{CounterRecord, EntityRef, Repository};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Repopulates cached counters from the system of record.
pub struct Rehydrator<R, S> {
    repo: Arc<R>,
    store: Arc<S>,
    dispatcher: Dispatcher,
}

impl<R: Repository, S: CounterStore> Rehydrator<R, S> {
    /// Creates a rehydrator.
    pub fn new(repo: Arc<R>, store: Arc<S>, dispatcher: Dispatcher) -> Self {
        Self { repo, store, dispatcher }
    }

    /// Loads the authoritative record of `entity` and caches it with a
    /// fresh TTL. Returns the record that was loaded.
    pub fn rehydrate(&self, entity: &EntityRef) -> Result<CounterRecord> {
        let record = self.repo.get(entity)?.ok_or_else(|| Error::not_found(entity.to_string()))?;
        let state = if record.deleted { RecordState::Deleted } else { RecordState::Expired };
        state.transition(Transition::Rehydrate)?;

        let inv = self.dispatcher.rehydrate(&record);
        self.store.invoke(&inv)?;
        log::debug!("Rehydrated {} from the system of record", entity);
        Ok(record)
    }

    /// Overwrites the cached copy of `entity`, and its ranking scores, with
    /// the authoritative values.
    pub fn refresh(&self, entity: &EntityRef) -> Result<CounterRecord> {
        let record = self.repo.get(entity)?.ok_or_else(|| Error::not_found(entity.to_string()))?;
        if record.deleted {
            return Err(Error::invalid_state(format!("cannot refresh deleted {}", entity)));
        }

        self.store.invoke(&self.dispatcher.refresh(&record))?;
        for inv in self.dispatcher.refresh_rankings(&record) {
            self.store.invoke(&inv)?;
        }
        log::debug!("Refreshed {} from the system of record", entity);
        Ok(record)
    }
}
