//! Cache population and invalidation controller.
//!
//! Every write goes to the system of record first. If that fails the
//! operation fails and the cache is left alone. The matching catalog script
//! then runs as a best-effort accelerator: its failures are logged and
//! reported in the [`Outcome`] but never fail the operation.
//!
//! Toggles (agree, collect, follow and their cancels) flip an [`Edge`] in
//! the system of record first; only a toggle that flips its edge moves any
//! counter. The cached marker stays the script's own guard. If the script
//! finds it already in the requested state while the edge did flip, the
//! cache missed an earlier transition and the affected records are
//! refreshed from the system of record.
//!
//! A script reporting the primary counter record as absent triggers
//! rehydration from the system of record, whose value already includes the
//! mutation.

use crate::config::Options;
use crate::engine::adapter::{CounterStore, Status};
use crate::engine::dispatch::{Dispatcher, Event, Invocation};
use crate::engine::keys::{self, field, VISIT_SUFFIX};
use crate::engine::lifecycle::{RecordState, Transition};
use crate::engine::model::{ContentCounters, Kind, UserAchievement, UserContentCounts, Visibility};
use crate::engine::rehydrate::Rehydrator;
use crate::engine::repository::{CounterRecord, Edge, EntityRef, Repository};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// What happened to the cache during a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Script applied.
    Applied,
    /// Script found the marker already in the requested state. After a
    /// toggle that was recorded, the affected records have been refreshed.
    Duplicate,
    /// Primary record was absent and has been rehydrated.
    Rehydrated,
    /// Primary record was absent and rehydration failed.
    Missed,
    /// No script was run.
    Skipped,
    /// The script failed; the cache is unchanged.
    Failed(String),
}

/// Result of a write operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// The system of record was changed.
    pub recorded: bool,
    /// Cache side of the operation.
    pub cache: CacheOutcome,
}

impl Outcome {
    fn written(cache: CacheOutcome) -> Self {
        Self { recorded: true, cache }
    }

    fn skipped() -> Self {
        Self { recorded: false, cache: CacheOutcome::Skipped }
    }

    /// Returns true if the operation was an idempotent no-op.
    pub fn is_noop(&self) -> bool {
        !self.recorded
    }
}

/// Keeps cached engagement counters in step with the system of record.
pub struct Controller<R, S> {
    repo: Arc<R>,
    store: Arc<S>,
    dispatcher: Dispatcher,
    rehydrator: Rehydrator<R, S>,
}

fn state_of(record: Option<&CounterRecord>) -> RecordState {
    match record {
        None => RecordState::Absent,
        Some(r) if r.deleted => RecordState::Deleted,
        Some(_) => RecordState::Active,
    }
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

impl<R: Repository, S: CounterStore> Controller<R, S> {
    /// Creates a controller stamping `options.counter_ttl_secs` on cached
    /// records.
    pub fn new(repo: Arc<R>, store: Arc<S>, options: &Options) -> Self {
        let dispatcher = Dispatcher::from_options(options);
        let rehydrator = Rehydrator::new(repo.clone(), store.clone(), dispatcher);
        Self { repo, store, dispatcher, rehydrator }
    }

    /// The system of record.
    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// The counter store.
    pub fn store(&self) -> &S {
        &self.store
    }

    // ------------------------------------------------------------------
    // Users and content
    // ------------------------------------------------------------------

    /// Registers a user: zeroed achievement and content counts.
    pub fn register_user(&self, uuid: &str) -> Result<Outcome> {
        let inv = self.dispatcher.dispatch(&Event::RegisterUser { uuid: uuid.to_string() })?;
        let existing = self.repo.get(&EntityRef::achievement(uuid))?;
        state_of(existing.as_ref()).transition(Transition::Create)?;

        self.repo.upsert(CounterRecord::achievement(uuid))?;
        self.repo.upsert(CounterRecord::content_counts(uuid))?;
        Ok(Outcome::written(self.run_cache(&inv, &[])))
    }

    /// Creates a content entity and fans it out to every view.
    pub fn create_content(
        &self,
        kind: Kind,
        id: u64,
        owner: &str,
        visibility: Visibility,
    ) -> Result<Outcome> {
        let inv = self.dispatcher.dispatch(&Event::Create {
            kind,
            id,
            owner: owner.to_string(),
            visibility,
            score: chronological_score(id)?,
        })?;
        let entity = EntityRef::content(kind, id);
        state_of(self.repo.get(&entity)?.as_ref()).transition(Transition::Create)?;

        self.ensure_user(owner)?;
        self.repo.upsert(CounterRecord::content(kind, id, owner, visibility))?;
        self.adjust_counts(owner, kind, visibility, 1)?;
        Ok(Outcome::written(self.run_cache(&inv, &[])))
    }

    /// Changes the visibility of existing content.
    pub fn republish(&self, kind: Kind, id: u64, visibility: Visibility) -> Result<Outcome> {
        let entity = EntityRef::content(kind, id);
        let record = self.live(&entity)?;
        let inv = self.dispatcher.dispatch(&Event::Republish {
            kind,
            id,
            owner: record.owner.clone(),
            visibility,
            score: chronological_score(id)?,
        })?;

        let changed = record.visibility != visibility;
        if changed {
            let counts = EntityRef::content_counts(record.owner.as_str());
            let visit = format!("{}{}", kind, VISIT_SUFFIX);
            let delta = if visibility == Visibility::Public { 1 } else { -1 };
            self.repo.upsert(CounterRecord { visibility, ..record.clone() })?;
            self.ensure_user(&record.owner)?;
            self.repo.increment_column(&counts, &visit, delta)?;
        }
        let cache = self.run_cache(&inv, &[entity]);
        Ok(Outcome { recorded: changed, cache })
    }

    /// Deletes content from every view and forgets who agreed with or
    /// collected it, so a later re-creation starts clean. Deleting twice is
    /// a no-op on the system of record; the cache cleanup runs again.
    pub fn delete_content(&self, kind: Kind, id: u64) -> Result<Outcome> {
        let entity = EntityRef::content(kind, id);
        let record = self.repo.get(&entity)?.ok_or_else(|| Error::not_found(entity.to_string()))?;
        let inv = self.dispatcher.dispatch(&Event::Delete {
            kind,
            id,
            owner: record.owner.clone(),
            visibility: record.visibility,
        })?;
        let recorded = !record.deleted;
        if recorded {
            state_of(Some(&record)).transition(Transition::Delete)?;
            self.repo.upsert(CounterRecord { deleted: true, ..record.clone() })?;
            self.adjust_counts(&record.owner, kind, record.visibility, -1)?;
            let cleared = self.repo.clear_edges(&entity)?;
            log::debug!("Deleted {}, cleared {} engagement edges", entity, cleared);
        }
        let cache = self.run_cache(&inv, &[]);
        Ok(Outcome { recorded, cache })
    }

    // ------------------------------------------------------------------
    // Engagement
    // ------------------------------------------------------------------

    /// `user` agrees with a content entity.
    pub fn agree(&self, kind: Kind, id: u64, user: &str) -> Result<Outcome> {
        let record = self.live(&EntityRef::content(kind, id))?;
        let event = Event::Agree { kind, id, owner: record.owner.clone(), user: user.to_string() };
        self.toggle(event, &record, Edge::agree(user, kind, id), true, &[field::AGREE, field::SCORE])
    }

    /// `user` withdraws an agree.
    pub fn cancel_agree(&self, kind: Kind, id: u64, user: &str) -> Result<Outcome> {
        let record = self.live(&EntityRef::content(kind, id))?;
        let event =
            Event::CancelAgree { kind, id, owner: record.owner.clone(), user: user.to_string() };
        self.toggle(event, &record, Edge::agree(user, kind, id), false, &[field::AGREE, field::SCORE])
    }

    /// `user` collects a content entity.
    pub fn collect(&self, kind: Kind, id: u64, user: &str) -> Result<Outcome> {
        let record = self.live(&EntityRef::content(kind, id))?;
        let event = Event::Collect {
            kind,
            id,
            owner: record.owner.clone(),
            user: user.to_string(),
            at: unix_now(),
        };
        self.toggle(event, &record, Edge::collect(user, kind, id), true, &[field::COLLECT, field::SCORE])
    }

    /// `user` removes a content entity from their collections.
    pub fn cancel_collect(&self, kind: Kind, id: u64, user: &str) -> Result<Outcome> {
        let record = self.live(&EntityRef::content(kind, id))?;
        let event =
            Event::CancelCollect { kind, id, owner: record.owner.clone(), user: user.to_string() };
        self.toggle(event, &record, Edge::collect(user, kind, id), false, &[field::COLLECT, field::SCORE])
    }

    /// Records a view.
    pub fn view(&self, kind: Kind, id: u64) -> Result<Outcome> {
        let entity = EntityRef::content(kind, id);
        let record = self.live(&entity)?;
        let inv = self.dispatcher.dispatch(&Event::View { kind, id, owner: record.owner.clone() })?;

        self.ensure_user(&record.owner)?;
        self.repo.increment_column(&entity, field::VIEW, 1)?;
        self.repo.increment_column(&EntityRef::achievement(record.owner.as_str()), field::VIEW, 1)?;
        Ok(Outcome::written(self.run_cache(&inv, &[entity])))
    }

    /// Adds a comment to a parent entity.
    pub fn add_comment(
        &self,
        parent_kind: Kind,
        parent_id: u64,
        comment_id: u64,
        author: &str,
    ) -> Result<Outcome> {
        let parent = EntityRef::content(parent_kind, parent_id);
        self.live(&parent)?;
        let comment = EntityRef::content(Kind::Comment, comment_id);
        state_of(self.repo.get(&comment)?.as_ref()).transition(Transition::Create)?;
        let inv = self.dispatcher.dispatch(&Event::CommentAdd {
            parent_kind,
            parent_id,
            comment_id,
            author: author.to_string(),
        })?;

        self.ensure_user(author)?;
        self.repo.upsert(CounterRecord::comment(comment_id, author, parent.clone()))?;
        self.repo.increment_column(&parent, field::COMMENT, 1)?;
        Ok(Outcome::written(self.run_cache(&inv, &[parent])))
    }

    /// Removes a comment from the entity it was added to. Removing an
    /// already removed comment is a no-op.
    pub fn remove_comment(&self, comment_id: u64) -> Result<Outcome> {
        let comment = EntityRef::content(Kind::Comment, comment_id);
        let record = self.repo.get(&comment)?.ok_or_else(|| Error::not_found(comment.to_string()))?;
        if record.deleted {
            return Ok(Outcome::skipped());
        }
        let (parent_kind, parent_id) = match &record.parent {
            Some(EntityRef::Content { kind, id }) => (*kind, *id),
            _ => return Err(Error::invalid_state(format!("{} has no parent entity", comment))),
        };
        let inv = self.dispatcher.dispatch(&Event::CommentRemove {
            parent_kind,
            parent_id,
            comment_id,
        })?;

        let parent = EntityRef::content(parent_kind, parent_id);
        self.repo.upsert(CounterRecord { deleted: true, ..record })?;
        self.repo.clear_edges(&comment)?;
        if self.repo.get(&parent)?.is_some_and(|p| !p.deleted) {
            self.repo.increment_column(&parent, field::COMMENT, -1)?;
        }
        Ok(Outcome::written(self.run_cache(&inv, &[parent])))
    }

    // ------------------------------------------------------------------
    // Social graph
    // ------------------------------------------------------------------

    /// `follower` follows `followed`.
    pub fn follow(&self, follower: &str, followed: &str) -> Result<Outcome> {
        self.follow_toggle(follower, followed, true)
    }

    /// `follower` stops following `followed`.
    pub fn unfollow(&self, follower: &str, followed: &str) -> Result<Outcome> {
        self.follow_toggle(follower, followed, false)
    }

    fn follow_toggle(&self, follower: &str, followed: &str, on: bool) -> Result<Outcome> {
        let event = if on {
            Event::Follow { follower: follower.to_string(), followed: followed.to_string() }
        } else {
            Event::Unfollow { follower: follower.to_string(), followed: followed.to_string() }
        };
        let inv = self.dispatcher.dispatch(&event)?;
        let edge = Edge::follow(follower, followed);
        if !self.repo.set_edge(&edge, on)? {
            return Ok(Outcome::skipped());
        }

        let followed_ref = EntityRef::achievement(followed);
        let follower_ref = EntityRef::achievement(follower);
        let delta = if on { 1 } else { -1 };
        let first = self
            .ensure_user(followed)
            .and_then(|()| self.ensure_user(follower))
            .and_then(|()| self.repo.increment_column(&followed_ref, field::FOLLOWED, delta));
        if let Err(e) = first {
            self.restore_edge(&edge, on);
            return Err(e);
        }
        self.repo.increment_column(&follower_ref, field::FOLLOW, delta)?;

        let touched = [followed_ref, follower_ref];
        let cache = self.run_cache(&inv, &touched);
        self.reconcile(&inv, &cache, &touched);
        Ok(Outcome::written(cache))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Counters of a content entity.
    pub fn content_counters(&self, kind: Kind, id: u64) -> Result<ContentCounters> {
        self.read_through(
            EntityRef::content(kind, id),
            ContentCounters::from_fields,
            ContentCounters::from_record,
        )
    }

    /// Achievement of a user.
    pub fn achievement(&self, uuid: &str) -> Result<UserAchievement> {
        self.read_through(
            EntityRef::achievement(uuid),
            UserAchievement::from_fields,
            UserAchievement::from_record,
        )
    }

    /// Per-kind content counts of a user.
    pub fn content_counts(&self, uuid: &str) -> Result<UserContentCounts> {
        self.read_through(
            EntityRef::content_counts(uuid),
            UserContentCounts::from_fields,
            UserContentCounts::from_record,
        )
    }

    /// Top `limit` entries of a ranking view, highest score first.
    pub fn ranking(&self, kind: Kind, view: &str, limit: usize) -> Result<Vec<(u64, i64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        self.store
            .zrevrange(&keys::ranking(kind, view), 0, stop)?
            .into_iter()
            .map(|(member, score)| Ok((parse_id(&member)?, score)))
            .collect()
    }

    /// Ids of the entities `user` collected, newest first.
    pub fn collections(&self, user: &str, kind: Kind) -> Result<Vec<u64>> {
        self.store
            .zrevrange(&keys::collections(user, kind), 0, -1)?
            .into_iter()
            .map(|(member, _)| parse_id(&member))
            .collect()
    }

    /// Observed lifecycle state of a content counter record.
    pub fn record_state(&self, kind: Kind, id: u64) -> Result<RecordState> {
        let entity = EntityRef::content(kind, id);
        let record = match self.repo.get(&entity)? {
            None => return Ok(RecordState::Absent),
            Some(r) if r.deleted => return Ok(RecordState::Deleted),
            Some(r) => r,
        };
        let fields = self.store.hgetall(&entity.cache_key())?;
        if fields.is_empty() {
            return Ok(RecordState::Expired);
        }
        let counters = ContentCounters::from_fields(&fields)?;
        let untouched = counters.agree == 0
            && counters.view == 0
            && counters.collect == 0
            && counters.comment == 0
            && record.columns.values().all(|v| *v == 0);
        Ok(if untouched { RecordState::Created } else { RecordState::Active })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn read_through<T>(
        &self,
        entity: EntityRef,
        from_fields: fn(&BTreeMap<String, String>) -> Result<T>,
        from_record: fn(&CounterRecord) -> T,
    ) -> Result<T> {
        match self.store.hgetall(&entity.cache_key()) {
            Ok(fields) if !fields.is_empty() => return from_fields(&fields),
            Ok(_) => {}
            Err(e) => {
                log::warn!("Reading {} from cache failed, using system of record: {}", entity, e);
                return Ok(from_record(&self.live(&entity)?));
            }
        }
        match self.rehydrator.rehydrate(&entity) {
            Ok(record) => Ok(from_record(&record)),
            Err(e) if e.is_cache_failure() => {
                log::warn!("Rehydrating {} failed, using system of record: {}", entity, e);
                Ok(from_record(&self.live(&entity)?))
            }
            Err(e) => Err(e),
        }
    }

    /// Runs a cache script and rehydrates `on_miss` if it reports a miss.
    fn run_cache(&self, inv: &Invocation, on_miss: &[EntityRef]) -> CacheOutcome {
        match self.store.invoke(inv) {
            Ok(Status::Applied) => CacheOutcome::Applied,
            Ok(Status::NoOp) => CacheOutcome::Duplicate,
            Ok(Status::Missing) => {
                for entity in on_miss {
                    if let Err(e) = self.rehydrator.rehydrate(entity) {
                        log::warn!("Rehydrating {} after {} failed: {}", entity, inv.script, e);
                        return CacheOutcome::Missed;
                    }
                }
                CacheOutcome::Rehydrated
            }
            Err(e) => {
                log::warn!("Cache script {} failed: {}", inv.script, e);
                CacheOutcome::Failed(e.to_string())
            }
        }
    }

    fn toggle(
        &self,
        event: Event,
        record: &CounterRecord,
        edge: Edge,
        on: bool,
        owner_columns: &[&str],
    ) -> Result<Outcome> {
        let inv = self.dispatcher.dispatch(&event)?;
        if !self.repo.set_edge(&edge, on)? {
            return Ok(Outcome::skipped());
        }

        let delta = if on { 1 } else { -1 };
        let owner = EntityRef::achievement(record.owner.as_str());
        let first = self
            .ensure_user(&record.owner)
            .and_then(|()| self.repo.increment_column(&record.entity, owner_columns[0], delta));
        if let Err(e) = first {
            self.restore_edge(&edge, on);
            return Err(e);
        }
        for column in owner_columns {
            self.repo.increment_column(&owner, column, delta)?;
        }

        let touched = [record.entity.clone(), owner];
        let cache = self.run_cache(&inv, &touched[..1]);
        self.reconcile(&inv, &cache, &touched);
        Ok(Outcome::written(cache))
    }

    /// Puts an edge back after the toggle that flipped it failed before
    /// moving any counter.
    fn restore_edge(&self, edge: &Edge, on: bool) {
        if let Err(e) = self.repo.set_edge(edge, !on) {
            log::warn!("Restoring edge {} failed: {}", edge, e);
        }
    }

    /// A recorded toggle whose script found the marker already in place
    /// means the cache missed an earlier transition. Overwrite what it
    /// holds for `touched` with the authoritative values.
    fn reconcile(&self, inv: &Invocation, cache: &CacheOutcome, touched: &[EntityRef]) {
        if *cache != CacheOutcome::Duplicate {
            return;
        }
        log::info!("{} disagreed with the system of record, refreshing", inv.script);
        for entity in touched {
            if let Err(e) = self.rehydrator.refresh(entity) {
                log::warn!("Refreshing {} after {} failed: {}", entity, inv.script, e);
            }
        }
    }

    /// A record that exists and is not deleted.
    fn live(&self, entity: &EntityRef) -> Result<CounterRecord> {
        match self.repo.get(entity)? {
            None => Err(Error::not_found(entity.to_string())),
            Some(r) if r.deleted => Err(Error::invalid_state(format!("{} is deleted", entity))),
            Some(r) => Ok(r),
        }
    }

    /// Creates missing per-user records in the system of record.
    fn ensure_user(&self, uuid: &str) -> Result<()> {
        if self.repo.get(&EntityRef::achievement(uuid))?.is_none() {
            self.repo.upsert(CounterRecord::achievement(uuid))?;
        }
        if self.repo.get(&EntityRef::content_counts(uuid))?.is_none() {
            self.repo.upsert(CounterRecord::content_counts(uuid))?;
        }
        Ok(())
    }

    fn adjust_counts(&self, owner: &str, kind: Kind, visibility: Visibility, delta: i64) -> Result<()> {
        let counts = EntityRef::content_counts(owner);
        self.repo.increment_column(&counts, kind.as_str(), delta)?;
        if visibility == Visibility::Public {
            self.repo.increment_column(&counts, &format!("{}{}", kind, VISIT_SUFFIX), delta)?;
        }
        Ok(())
    }
}

/// Chronological indexes score entities by id.
fn chronological_score(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| Error::invalid_argument(format!("id {} is out of range", id)))
}

fn parse_id(member: &str) -> Result<u64> {
    member.parse().map_err(|_| Error::NotInteger(member.to_string()))
}
