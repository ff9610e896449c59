use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::PinError;
use crate::model::{PinId, PinRecord, PinStats, PinSubmission, Scope, UserId};

pub mod http;

pub use http::HttpBackend;

/// Remote source of truth for pins.
#[async_trait]
pub trait PinBackend: Send + Sync {
    async fn fetch(&self, scope: Scope) -> Result<Vec<PinRecord>, PinError>;
    async fn create(&self, submission: &PinSubmission) -> Result<PinRecord, PinError>;
    async fn update(&self, id: PinId, submission: &PinSubmission) -> Result<PinRecord, PinError>;
    async fn delete(&self, id: PinId) -> Result<(), PinError>;
    async fn copy(&self, id: PinId) -> Result<(), PinError>;
    async fn stats(&self) -> Result<PinStats, PinError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub scope: Scope,
    seq: u64,
    commits: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateTicket {
    pub scope: Scope,
}

/// A mutation committed while a load was outstanding.
#[derive(Debug, Clone, PartialEq)]
enum Commit {
    Created(PinRecord),
    Updated(PinRecord),
    Removed(PinId),
}

/// The committed collection, in server order.
///
/// Results are applied through the `apply_*` methods, each of which
/// re-checks that its target is still current before touching state. A
/// failed or stale result never changes the collection.
///
/// Mutations committed after a load was issued are journaled and replayed
/// onto that load's snapshot, so a reply that left the server before the
/// mutation cannot undo it.
#[derive(Debug, Clone)]
pub struct PinStore {
    scope: Scope,
    caller: Option<UserId>,
    pins: IndexMap<PinId, PinRecord>,
    load_seq: u64,
    loaded: bool,
    commit_seq: u64,
    load_pending: bool,
    journal: Vec<Commit>,
}

impl PinStore {
    pub fn new(scope: Scope, caller: Option<UserId>) -> Self {
        Self {
            scope,
            caller,
            pins: IndexMap::new(),
            load_seq: 0,
            loaded: false,
            commit_seq: 0,
            load_pending: false,
            journal: Vec::new(),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn caller(&self) -> Option<UserId> {
        self.caller
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn pins(&self) -> indexmap::map::Values<'_, PinId, PinRecord> {
        self.pins.values()
    }

    pub fn get(&self, id: PinId) -> Option<&PinRecord> {
        self.pins.get(&id)
    }

    pub fn contains(&self, id: PinId) -> bool {
        self.pins.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<PinId> {
        self.pins.keys().copied().collect()
    }

    /// `Some(false)` only when both the caller and the pin are known and differ.
    pub fn is_owner(&self, pin: &PinRecord) -> Option<bool> {
        self.caller.map(|caller| pin.is_owned_by(caller))
    }

    /// Rejects non-owners before a request is issued.
    pub fn authorize_mutation(&self, id: PinId) -> Result<(), PinError> {
        match self.get(id).and_then(|pin| self.is_owner(pin)) {
            Some(false) => Err(PinError::Authorization { status: 403 }),
            _ => Ok(()),
        }
    }

    /// Marks a new load of `scope` as the only one whose result will be accepted.
    pub fn begin_load(&mut self, scope: Scope) -> LoadTicket {
        self.load_seq += 1;
        // Only the newest load can land, so older journal entries are moot.
        self.journal.clear();
        self.load_pending = true;
        LoadTicket {
            scope,
            seq: self.load_seq,
            commits: self.commit_seq,
        }
    }

    pub fn create_ticket(&self) -> CreateTicket {
        CreateTicket { scope: self.scope }
    }

    pub fn apply_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<PinRecord>, PinError>,
    ) -> Result<usize, PinError> {
        if ticket.seq != self.load_seq {
            tracing::debug!(?ticket, latest = self.load_seq, "discarding superseded load");
            return Err(PinError::Superseded);
        }
        self.load_pending = false;
        let journal = std::mem::take(&mut self.journal);
        let records = result?;
        let mut pins = IndexMap::with_capacity(records.len());
        for record in records {
            if let Some(previous) = pins.insert(record.id, record) {
                tracing::warn!(id = %previous.id, "server returned duplicate pin id, keeping last");
            }
        }
        if !journal.is_empty() {
            tracing::debug!(
                replayed = journal.len(),
                since = ticket.commits,
                latest = self.commit_seq,
                "replaying commits made while loading"
            );
        }
        for commit in journal {
            replay(&mut pins, ticket.scope, commit);
        }
        self.scope = ticket.scope;
        self.pins = pins;
        self.loaded = true;
        tracing::info!(scope = %self.scope, count = self.pins.len(), "pin collection loaded");
        Ok(self.pins.len())
    }

    pub fn apply_create(
        &mut self,
        ticket: CreateTicket,
        result: Result<PinRecord, PinError>,
    ) -> Result<PinId, PinError> {
        let record = result?;
        let id = record.id;
        let belongs = ticket.scope == self.scope && (self.scope == Scope::Mine || record.is_public);
        if !belongs {
            tracing::debug!(%id, "created pin is outside the collection being browsed");
            return Ok(id);
        }
        if self.pins.contains_key(&id) {
            tracing::debug!(%id, "created pin already present, keeping existing entry");
            return Ok(id);
        }
        self.pins.insert(id, record.clone());
        self.record(Commit::Created(record));
        tracing::info!(%id, "pin created");
        Ok(id)
    }

    pub fn apply_update(
        &mut self,
        id: PinId,
        result: Result<PinRecord, PinError>,
    ) -> Result<PinId, PinError> {
        let record = result?;
        if record.id != id {
            return Err(PinError::Decode(format!(
                "update of {id} answered with {}",
                record.id
            )));
        }
        let Some(slot) = self.pins.get_mut(&id) else {
            tracing::debug!(%id, "discarding update for pin no longer in collection");
            return Err(PinError::StaleTarget(id));
        };
        if slot.owner != record.owner {
            return Err(PinError::Decode(format!("update of {id} changed its owner")));
        }
        *slot = record.clone();
        self.record(Commit::Updated(record));
        tracing::info!(%id, "pin updated");
        Ok(id)
    }

    pub fn apply_remove(&mut self, id: PinId, result: Result<(), PinError>) -> Result<(), PinError> {
        result?;
        if self.pins.shift_remove(&id).is_none() {
            tracing::debug!(%id, "deleted pin already absent");
            return Err(PinError::StaleTarget(id));
        }
        self.record(Commit::Removed(id));
        tracing::info!(%id, "pin deleted");
        Ok(())
    }

    fn record(&mut self, commit: Commit) {
        self.commit_seq += 1;
        if self.load_pending {
            self.journal.push(commit);
        }
    }

    pub async fn load<B>(&mut self, backend: &B, scope: Scope) -> Result<usize, PinError>
    where
        B: PinBackend + ?Sized,
    {
        let ticket = self.begin_load(scope);
        let result = backend.fetch(scope).await;
        self.apply_load(ticket, result)
    }

    pub async fn create<B>(
        &mut self,
        backend: &B,
        submission: &PinSubmission,
    ) -> Result<PinId, PinError>
    where
        B: PinBackend + ?Sized,
    {
        let ticket = self.create_ticket();
        let result = backend.create(submission).await;
        self.apply_create(ticket, result)
    }

    pub async fn update<B>(
        &mut self,
        backend: &B,
        id: PinId,
        submission: &PinSubmission,
    ) -> Result<PinId, PinError>
    where
        B: PinBackend + ?Sized,
    {
        self.authorize_mutation(id)?;
        let result = backend.update(id, submission).await;
        self.apply_update(id, result)
    }

    pub async fn remove<B>(&mut self, backend: &B, id: PinId) -> Result<(), PinError>
    where
        B: PinBackend + ?Sized,
    {
        self.authorize_mutation(id)?;
        let result = backend.delete(id).await;
        self.apply_remove(id, result)
    }

    /// Duplicates `id` into the caller's own pins; the browsed collection is left as is.
    pub async fn copy<B>(&self, backend: &B, id: PinId) -> Result<(), PinError>
    where
        B: PinBackend + ?Sized,
    {
        backend.copy(id).await?;
        tracing::info!(%id, "pin copied to own collection");
        Ok(())
    }
}

fn replay(pins: &mut IndexMap<PinId, PinRecord>, scope: Scope, commit: Commit) {
    match commit {
        Commit::Created(record) => {
            if (scope == Scope::Mine || record.is_public) && !pins.contains_key(&record.id) {
                pins.insert(record.id, record);
            }
        }
        Commit::Updated(record) => {
            if let Some(slot) = pins.get_mut(&record.id) {
                *slot = record;
            }
        }
        Commit::Removed(id) => {
            pins.shift_remove(&id);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use time::OffsetDateTime;

    use super::*;
    use crate::model::{Coordinate, PinCategory, PinStatus, Section};

    /// In-memory server used as the reference model.
    pub(crate) struct FakeBackend {
        pub caller: UserId,
        pub pins: Mutex<BTreeMap<PinId, PinRecord>>,
        pub next_id: Mutex<u64>,
        pub requests: AtomicUsize,
        pub fail_next: Mutex<Option<PinError>>,
    }

    impl FakeBackend {
        pub(crate) fn new(caller: UserId) -> Self {
            Self {
                caller,
                pins: Mutex::new(BTreeMap::new()),
                next_id: Mutex::new(100),
                requests: AtomicUsize::new(0),
                fail_next: Mutex::new(None),
            }
        }

        pub(crate) fn seed(&self, owner: UserId, title: &str, is_public: bool) -> PinId {
            let submission = submission(title, Some(Coordinate::normalized(1.0, 2.0)));
            let record = self.build(owner, &submission, None);
            let id = record.id;
            let mut record = record;
            record.is_public = is_public;
            self.pins.lock().unwrap().insert(id, record);
            id
        }

        pub(crate) fn fail_next(&self, err: PinError) {
            *self.fail_next.lock().unwrap() = Some(err);
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }

        fn take_failure(&self) -> Result<(), PinError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            match self.fail_next.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn build(&self, owner: UserId, sub: &PinSubmission, existing: Option<&PinRecord>) -> PinRecord {
            let id = existing.map(|pin| pin.id).unwrap_or_else(|| {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                PinId(*next)
            });
            PinRecord {
                id,
                owner,
                owner_name: None,
                title: sub.title.clone(),
                sections: sub.sections.clone(),
                status: sub.status,
                category: sub.category,
                is_public: sub.is_public,
                coordinate: existing
                    .map(|pin| pin.coordinate)
                    .or(sub.coordinate)
                    .unwrap_or_else(|| Coordinate::normalized(0.0, 0.0)),
                image: existing.and_then(|pin| pin.image.clone()),
                created_at: OffsetDateTime::UNIX_EPOCH,
            }
        }
    }

    #[async_trait]
    impl PinBackend for FakeBackend {
        async fn fetch(&self, scope: Scope) -> Result<Vec<PinRecord>, PinError> {
            self.take_failure()?;
            let pins = self.pins.lock().unwrap();
            Ok(pins
                .values()
                .filter(|pin| match scope {
                    Scope::Mine => pin.owner == self.caller,
                    Scope::Public => pin.is_public,
                })
                .cloned()
                .collect())
        }

        async fn create(&self, submission: &PinSubmission) -> Result<PinRecord, PinError> {
            self.take_failure()?;
            let record = self.build(self.caller, submission, None);
            self.pins.lock().unwrap().insert(record.id, record.clone());
            Ok(record)
        }

        async fn update(&self, id: PinId, submission: &PinSubmission) -> Result<PinRecord, PinError> {
            self.take_failure()?;
            let mut pins = self.pins.lock().unwrap();
            let existing = pins
                .get(&id)
                .filter(|pin| pin.owner == self.caller)
                .cloned()
                .ok_or(PinError::Authorization { status: 404 })?;
            let record = self.build(self.caller, submission, Some(&existing));
            pins.insert(id, record.clone());
            Ok(record)
        }

        async fn delete(&self, id: PinId) -> Result<(), PinError> {
            self.take_failure()?;
            let mut pins = self.pins.lock().unwrap();
            match pins.get(&id) {
                Some(pin) if pin.owner == self.caller => {
                    pins.remove(&id);
                    Ok(())
                }
                _ => Err(PinError::Authorization { status: 404 }),
            }
        }

        async fn copy(&self, id: PinId) -> Result<(), PinError> {
            self.take_failure()?;
            let source = self
                .pins
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(PinError::Rejected { status: 404 })?;
            let sub = PinSubmission {
                title: source.title.clone(),
                sections: source.sections.clone(),
                status: source.status,
                category: source.category,
                is_public: false,
                coordinate: Some(source.coordinate),
                image: None,
            };
            let copy = self.build(self.caller, &sub, None);
            self.pins.lock().unwrap().insert(copy.id, copy);
            Ok(())
        }

        async fn stats(&self) -> Result<PinStats, PinError> {
            self.take_failure()?;
            let pins = self.pins.lock().unwrap();
            let mine: Vec<_> = pins.values().filter(|p| p.owner == self.caller).collect();
            let count = |f: &dyn Fn(&PinRecord) -> bool| mine.iter().filter(|p| f(p)).count() as u64;
            Ok(PinStats {
                total_pins: mine.len() as u64,
                wishlisted_pins: count(&|p| p.status == PinStatus::Wishlisted),
                visited_pins: count(&|p| p.status == PinStatus::Visited),
                favorite_pins: count(&|p| p.status == PinStatus::Favorite),
                trip_pins: count(&|p| p.category == PinCategory::Trip),
                hotel_pins: count(&|p| p.category == PinCategory::Hotel),
                restaurant_pins: count(&|p| p.category == PinCategory::Restaurant),
                attraction_pins: count(&|p| p.category == PinCategory::Attraction),
                other_pins: count(&|p| p.category == PinCategory::Other),
            })
        }
    }

    pub(crate) fn submission(title: &str, coordinate: Option<Coordinate>) -> PinSubmission {
        PinSubmission {
            title: title.to_string(),
            sections: vec![Section::new("Notes", "")],
            status: PinStatus::Wishlisted,
            category: PinCategory::Trip,
            is_public: true,
            coordinate,
            image: None,
        }
    }

    const ME: UserId = UserId(1);
    const OTHER: UserId = UserId(2);

    #[tokio::test]
    async fn operations_track_reference_model() {
        let backend = FakeBackend::new(ME);
        backend.seed(ME, "seed a", true);
        backend.seed(OTHER, "theirs", true);
        backend.seed(ME, "seed b", false);
        let mut store = PinStore::new(Scope::Mine, Some(ME));
        store.load(&backend, Scope::Mine).await.expect("load");
        assert_eq!(store.len(), 2);

        let here = Some(Coordinate::normalized(10.0, 10.0));
        let a = store.create(&backend, &submission("a", here)).await.expect("create");
        let b = store.create(&backend, &submission("b", here)).await.expect("create");
        store
            .update(&backend, a, &submission("a2", None))
            .await
            .expect("update");
        store.remove(&backend, b).await.expect("remove");

        let mut expected: Vec<PinId> = backend
            .fetch(Scope::Mine)
            .await
            .expect("fetch")
            .into_iter()
            .map(|pin| pin.id)
            .collect();
        let mut actual = store.ids();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
        assert_eq!(store.get(a).map(|pin| pin.title.as_str()), Some("a2"));
    }

    #[tokio::test]
    async fn create_appends_and_update_keeps_position() {
        let backend = FakeBackend::new(ME);
        let first = backend.seed(ME, "first", true);
        let second = backend.seed(ME, "second", true);
        let mut store = PinStore::new(Scope::Mine, Some(ME));
        store.load(&backend, Scope::Mine).await.expect("load");

        let created = store
            .create(&backend, &submission("third", Some(Coordinate::normalized(0.0, 0.0))))
            .await
            .expect("create");
        assert_eq!(store.ids(), vec![first, second, created]);

        store
            .update(&backend, first, &submission("first, renamed", None))
            .await
            .expect("update");
        assert_eq!(store.ids(), vec![first, second, created]);
        assert_eq!(
            store.get(first).map(|pin| pin.title.as_str()),
            Some("first, renamed")
        );
    }

    #[tokio::test]
    async fn failures_leave_collection_untouched() {
        let backend = FakeBackend::new(ME);
        let id = backend.seed(ME, "keep", true);
        let mut store = PinStore::new(Scope::Mine, Some(ME));
        store.load(&backend, Scope::Mine).await.expect("load");
        let before = store.clone();

        backend.fail_next(PinError::Network("offline".into()));
        assert_matches!(store.load(&backend, Scope::Public).await, Err(PinError::Network(_)));
        assert_eq!(store.scope(), Scope::Mine);

        backend.fail_next(PinError::Network("offline".into()));
        assert!(store
            .create(&backend, &submission("x", Some(Coordinate::normalized(0.0, 0.0))))
            .await
            .is_err());
        backend.fail_next(PinError::Authorization { status: 403 });
        assert!(store.update(&backend, id, &submission("y", None)).await.is_err());
        backend.fail_next(PinError::Network("offline".into()));
        assert!(store.remove(&backend, id).await.is_err());

        assert_eq!(store.ids(), before.ids());
        assert_eq!(store.get(id), before.get(id));
    }

    #[tokio::test]
    async fn non_owner_update_is_refused_before_any_request() {
        let backend = FakeBackend::new(ME);
        let theirs = backend.seed(OTHER, "theirs", true);
        let mut store = PinStore::new(Scope::Public, Some(ME));
        store.load(&backend, Scope::Public).await.expect("load");
        let requests = backend.request_count();

        assert_matches!(
            store.update(&backend, theirs, &submission("mine now", None)).await,
            Err(PinError::Authorization { .. })
        );
        assert_matches!(
            store.remove(&backend, theirs).await,
            Err(PinError::Authorization { .. })
        );
        assert_eq!(backend.request_count(), requests);
        assert_eq!(store.get(theirs).map(|pin| pin.title.as_str()), Some("theirs"));
    }

    #[tokio::test]
    async fn copy_leaves_public_collection_alone_and_gets_new_id() {
        let backend = FakeBackend::new(ME);
        let source = backend.seed(OTHER, "shared", true);
        let mut store = PinStore::new(Scope::Public, Some(ME));
        store.load(&backend, Scope::Public).await.expect("load");
        let before = store.get(source).cloned();

        store.copy(&backend, source).await.expect("copy");
        store.copy(&backend, source).await.expect("copy again");
        assert_eq!(store.get(source).cloned(), before);
        assert_eq!(store.len(), 1);

        let mine = backend.fetch(Scope::Mine).await.expect("fetch");
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|pin| pin.id != source));
    }

    #[test]
    fn superseded_load_is_discarded() {
        let mut store = PinStore::new(Scope::Mine, Some(ME));
        let first = store.begin_load(Scope::Mine);
        let second = store.begin_load(Scope::Public);
        assert_matches!(store.apply_load(first, Ok(Vec::new())), Err(PinError::Superseded));
        assert!(!store.is_loaded());
        assert_matches!(store.apply_load(second, Ok(Vec::new())), Ok(0));
        assert_eq!(store.scope(), Scope::Public);
    }

    #[tokio::test]
    async fn commits_made_during_a_load_survive_its_older_snapshot() {
        let backend = FakeBackend::new(ME);
        let kept = backend.seed(ME, "kept", true);
        let doomed = backend.seed(ME, "doomed", true);
        let mut store = PinStore::new(Scope::Mine, Some(ME));
        store.load(&backend, Scope::Mine).await.expect("initial load");

        let ticket = store.begin_load(Scope::Mine);
        let snapshot = backend.fetch(Scope::Mine).await;
        let created = store
            .create(&backend, &submission("while loading", Some(Coordinate::normalized(3.0, 4.0))))
            .await
            .expect("create");
        store
            .update(&backend, kept, &submission("kept, renamed", None))
            .await
            .expect("update");
        store.remove(&backend, doomed).await.expect("remove");

        assert_matches!(store.apply_load(ticket, snapshot), Ok(2));
        assert_eq!(store.ids(), vec![kept, created]);
        assert_eq!(
            store.get(kept).map(|pin| pin.title.as_str()),
            Some("kept, renamed")
        );
        assert!(!store.contains(doomed));
    }

    #[test]
    fn commits_before_a_load_are_not_replayed_twice() {
        let backend = FakeBackend::new(ME);
        let id = backend.seed(ME, "only", true);
        let record = backend.pins.lock().unwrap().get(&id).cloned().expect("seeded");
        let mut store = PinStore::new(Scope::Mine, Some(ME));
        let first = store.begin_load(Scope::Mine);
        store.apply_load(first, Ok(vec![record.clone()])).expect("load");
        store.apply_remove(id, Ok(())).expect("remove");

        // The server still lists the pin; the newer snapshot wins.
        let second = store.begin_load(Scope::Mine);
        assert_matches!(store.apply_load(second, Ok(vec![record])), Ok(1));
        assert!(store.contains(id));
    }

    #[test]
    fn late_update_for_deleted_pin_is_stale() {
        let backend = FakeBackend::new(ME);
        let id = backend.seed(ME, "gone soon", true);
        let record = backend.pins.lock().unwrap().get(&id).cloned().expect("seeded");
        let mut store = PinStore::new(Scope::Mine, Some(ME));
        let ticket = store.begin_load(Scope::Mine);
        store.apply_load(ticket, Ok(vec![record.clone()])).expect("load");

        store.apply_remove(id, Ok(())).expect("remove");
        let err = store.apply_update(id, Ok(record)).expect_err("stale");
        assert!(err.is_stale());
        assert!(store.is_empty());
        assert!(store.apply_remove(id, Ok(())).expect_err("gone").is_stale());
    }

    #[test]
    fn private_create_does_not_enter_public_collection() {
        let backend = FakeBackend::new(ME);
        let id = backend.seed(ME, "private", false);
        let record = backend.pins.lock().unwrap().get(&id).cloned().expect("seeded");
        let mut store = PinStore::new(Scope::Public, Some(ME));
        let ticket = store.create_ticket();
        assert_eq!(store.apply_create(ticket, Ok(record)).expect("create"), id);
        assert!(store.is_empty());
    }
}
