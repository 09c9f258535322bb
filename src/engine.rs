//! Store-backed registry of client rotation states.
//!
//! [`RotationEngine`] is the only way to reach a client's [`ClientState`]. It
//! loads clients lazily from the [`Store`], keeps one mutex per client so
//! operations on the same client never interleave, reconciles each client
//! against the live eligible set before every operation, and writes the
//! result back.
//!
//! Lock order is registry, then client, then the random generator. The
//! registry lock is released before a client lock is taken.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::rotation::{seed_for, ClientState, SplitMix64};
use crate::store::Store;
use crate::validate_dimensions;

/// Which way to move a client's cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Stay on the current quote
    Current,
    /// Advance one quote
    Next,
    /// Go back one quote
    Previous,
    /// Jump to a random other quote
    Random,
}

impl Direction {
    /// Lowercase name, matching the endpoint path.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Current => "current",
            Direction::Next => "next",
            Direction::Previous => "previous",
            Direction::Random => "random",
        }
    }
}

/// Public view of a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client id
    pub client_name: String,
    /// Stored default width
    pub default_width: u32,
    /// Stored default height
    pub default_height: u32,
    /// Cursor into the rotation order
    pub current_position: usize,
    /// Number of quotes in the rotation order
    pub rotation_length: usize,
    /// Quote under the cursor, `None` when the catalog is empty
    pub current_quote_id: Option<String>,
}

impl From<&ClientState> for ClientInfo {
    fn from(state: &ClientState) -> Self {
        Self {
            client_name: state.client_id().to_string(),
            default_width: state.width,
            default_height: state.height,
            current_position: state.position(),
            rotation_length: state.rotation_order().len(),
            current_quote_id: state.current().ok().map(str::to_string),
        }
    }
}

/// Partial client update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientUpdate {
    /// New default width
    pub width: Option<i64>,
    /// New default height
    pub height: Option<i64>,
    /// New cursor position, validated against the current order
    pub position: Option<i64>,
}

/// What to render for one quote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Client the selection was made for
    pub client_id: String,
    /// Quote to render
    pub quote_id: String,
    /// Cursor after the move
    pub position: usize,
    /// Width to render at
    pub width: u32,
    /// Height to render at
    pub height: u32,
}

type ClientHandle = Arc<Mutex<ClientState>>;

/// Per-client rotation, persisted in the [`Store`].
#[derive(Debug)]
pub struct RotationEngine {
    store: Store,
    default_width: u32,
    default_height: u32,
    clients: Mutex<HashMap<String, ClientHandle>>,
    rng: Mutex<SplitMix64>,
}

impl RotationEngine {
    /// Create an engine. Clients registered without dimensions get the
    /// defaults given here.
    pub fn new(store: Store, default_width: u32, default_height: u32) -> Self {
        Self {
            store,
            default_width,
            default_height,
            clients: Mutex::new(HashMap::new()),
            rng: Mutex::new(SplitMix64::from_clock()),
        }
    }

    /// Replace the generator behind [`Direction::Random`], for reproducible runs.
    #[must_use]
    pub fn with_rng(mut self, rng: SplitMix64) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Underlying store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Register a client, or return the existing one unchanged.
    ///
    /// Returns the client and whether it was created by this call. Dimensions
    /// are ignored for existing clients.
    pub fn register(
        &self,
        client_id: &str,
        width: Option<i64>,
        height: Option<i64>,
    ) -> Result<(ClientInfo, bool), Error> {
        let (handle, created) = self.ensure(client_id, width, height)?;
        let info = self.with_client(&handle, |_| Ok(()))?;
        Ok((info, created))
    }

    /// Look up one client. Fails with [`Error::ClientNotFound`].
    pub fn get(&self, client_id: &str) -> Result<ClientInfo, Error> {
        let handle = self
            .load(client_id)?
            .ok_or_else(|| Error::ClientNotFound(client_id.to_string()))?;
        self.with_client(&handle, |_| Ok(()))
    }

    /// All registered clients, ordered by id.
    pub fn list(&self) -> Result<Vec<ClientInfo>, Error> {
        self.store
            .list_clients()?
            .into_iter()
            .map(|record| self.get(&record.client_id))
            .collect()
    }

    /// Apply a partial update. Fails with [`Error::ClientNotFound`] for unknown
    /// clients; on any validation error nothing is changed.
    pub fn update(&self, client_id: &str, update: &ClientUpdate) -> Result<ClientInfo, Error> {
        let handle = self
            .load(client_id)?
            .ok_or_else(|| Error::ClientNotFound(client_id.to_string()))?;

        self.with_client(&handle, |state| {
            let (width, height) = validate_dimensions(
                update.width.unwrap_or(i64::from(state.width)),
                update.height.unwrap_or(i64::from(state.height)),
            )?;
            if let Some(position) = update.position {
                state.set_position(position)?;
            }
            state.width = width;
            state.height = height;
            tracing::info!(client = %client_id, width, height, position = state.position(), "Updated client");
            Ok(())
        })
    }

    /// Move a client's cursor and pick the quote to render.
    ///
    /// Unknown clients are registered on the fly, taking `width`/`height` as
    /// their stored defaults. For known clients the overrides apply to this
    /// request only.
    pub fn step(
        &self,
        client_id: &str,
        direction: Direction,
        width: Option<i64>,
        height: Option<i64>,
    ) -> Result<Selection, Error> {
        if width.is_some() || height.is_some() {
            validate_dimensions(width.unwrap_or(1), height.unwrap_or(1))?;
        }
        let (handle, _) = self.ensure(client_id, width, height)?;

        let mut selection = None;
        self.with_client(&handle, |state| {
            let quote_id = match direction {
                Direction::Current => state.current()?.to_string(),
                Direction::Next => state.advance()?.to_string(),
                Direction::Previous => state.retreat()?.to_string(),
                Direction::Random => {
                    let mut rng = self.rng.lock()?;
                    state.random(&mut rng)?.to_string()
                }
            };
            let (width, height) = validate_dimensions(
                width.unwrap_or(i64::from(state.width)),
                height.unwrap_or(i64::from(state.height)),
            )?;
            selection = Some(Selection {
                client_id: client_id.to_string(),
                quote_id,
                position: state.position(),
                width,
                height,
            });
            Ok(())
        })?;

        let selection = selection.ok_or(Error::EmptyCatalog)?;
        tracing::debug!(
            client = %client_id,
            direction = direction.as_str(),
            quote_id = %selection.quote_id,
            position = selection.position,
            "Selected quote"
        );
        Ok(selection)
    }

    /// Find or create a client.
    fn ensure(
        &self,
        client_id: &str,
        width: Option<i64>,
        height: Option<i64>,
    ) -> Result<(ClientHandle, bool), Error> {
        if let Some(handle) = self.load(client_id)? {
            return Ok((handle, false));
        }

        let (width, height) = validate_dimensions(
            width.unwrap_or(i64::from(self.default_width)),
            height.unwrap_or(i64::from(self.default_height)),
        )?;
        let eligible = self.store.eligible_ids()?;
        let mut state = ClientState::new(client_id, width, height, seed_for(client_id));
        state.reconcile(&eligible);

        let mut clients = self.clients.lock()?;
        if let Some(handle) = clients.get(client_id) {
            // Registered concurrently while we were building
            return Ok((Arc::clone(handle), false));
        }
        let created = self.store.insert_client(&state.to_record())?;
        if !created {
            if let Some(record) = self.store.load_client(client_id)? {
                state = ClientState::restore(record, &eligible);
            }
        }
        let handle = Arc::new(Mutex::new(state));
        clients.insert(client_id.to_string(), Arc::clone(&handle));

        if created {
            tracing::info!(client = %client_id, width, height, "Registered client");
        }
        Ok((handle, created))
    }

    /// Find a client in memory or in the store.
    fn load(&self, client_id: &str) -> Result<Option<ClientHandle>, Error> {
        let mut clients = self.clients.lock()?;
        if let Some(handle) = clients.get(client_id) {
            return Ok(Some(Arc::clone(handle)));
        }
        let Some(record) = self.store.load_client(client_id)? else {
            return Ok(None);
        };
        let eligible = self.store.eligible_ids()?;
        let handle = Arc::new(Mutex::new(ClientState::restore(record, &eligible)));
        clients.insert(client_id.to_string(), Arc::clone(&handle));
        tracing::debug!(client = %client_id, "Loaded client from store");
        Ok(Some(handle))
    }

    /// Run `op` on a reconciled client under its lock and persist the result.
    ///
    /// When `op` fails the in-memory state is rolled back to the reconciled
    /// snapshot and nothing is written.
    fn with_client<F>(&self, handle: &ClientHandle, op: F) -> Result<ClientInfo, Error>
    where
        F: FnOnce(&mut ClientState) -> Result<(), Error>,
    {
        let eligible = self.store.eligible_ids()?;
        let mut state = handle.lock()?;
        let saved = state.to_record();
        state.reconcile(&eligible);

        let reconciled = state.clone();
        if let Err(err) = op(&mut *state) {
            *state = reconciled;
            if state.to_record() != saved {
                self.store.save_client(&state.to_record())?;
            }
            return Err(err);
        }

        let record = state.to_record();
        if record != saved {
            self.store.save_client(&record)?;
        }
        Ok(ClientInfo::from(&*state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::Quote;

    fn store_with(ids: &[&str]) -> Store {
        let store = Store::in_memory().unwrap();
        for id in ids {
            store.upsert_quote(&Quote::new(*id, format!("Quote {}", id))).unwrap();
        }
        store
    }

    fn engine(ids: &[&str]) -> RotationEngine {
        RotationEngine::new(store_with(ids), 800, 480).with_rng(SplitMix64::new(7))
    }

    #[test]
    fn test_register_is_idempotent() {
        let engine = engine(&["1", "2", "3"]);
        let (info, created) = engine.register("frame-1", Some(600), Some(448)).unwrap();
        assert!(created);
        assert_eq!((info.default_width, info.default_height), (600, 448));
        assert_eq!(info.rotation_length, 3);

        let (again, created) = engine.register("frame-1", Some(1024), Some(768)).unwrap();
        assert!(!created);
        assert_eq!(again, info);
    }

    #[test]
    fn test_register_uses_defaults() {
        let engine = engine(&["1"]);
        let (info, _) = engine.register("frame-1", None, None).unwrap();
        assert_eq!((info.default_width, info.default_height), (800, 480));
    }

    #[test]
    fn test_register_rejects_bad_dimensions() {
        let engine = engine(&["1"]);
        assert!(matches!(
            engine.register("frame-1", Some(0), None),
            Err(Error::InvalidDimensions { .. })
        ));
        assert!(matches!(
            engine.get("frame-1"),
            Err(Error::ClientNotFound(_))
        ));
    }

    #[test]
    fn test_get_unknown_client() {
        let engine = engine(&["1"]);
        assert!(matches!(engine.get("ghost"), Err(Error::ClientNotFound(_))));
        assert!(matches!(
            engine.update("ghost", &ClientUpdate::default()),
            Err(Error::ClientNotFound(_))
        ));
    }

    #[test]
    fn test_step_auto_registers_with_first_seen_size() {
        let engine = engine(&["1", "2", "3"]);
        let selection = engine
            .step("kitchen", Direction::Current, Some(600), Some(448))
            .unwrap();
        assert_eq!((selection.width, selection.height), (600, 448));

        // Later overrides apply to that request only
        let selection = engine
            .step("kitchen", Direction::Current, Some(1024), Some(768))
            .unwrap();
        assert_eq!((selection.width, selection.height), (1024, 768));
        let selection = engine.step("kitchen", Direction::Current, None, None).unwrap();
        assert_eq!((selection.width, selection.height), (600, 448));
    }

    #[test]
    fn test_next_cycles_through_catalog() {
        let engine = engine(&["1", "2", "3"]);
        let first = engine.step("frame-1", Direction::Current, None, None).unwrap();
        let mut seen = vec![first.quote_id.clone()];
        for _ in 0..2 {
            seen.push(engine.step("frame-1", Direction::Next, None, None).unwrap().quote_id);
        }
        let wrapped = engine.step("frame-1", Direction::Next, None, None).unwrap();
        assert_eq!(wrapped.quote_id, first.quote_id);
        assert_eq!(wrapped.position, 0);

        seen.sort();
        assert_eq!(seen, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_previous_undoes_next() {
        let engine = engine(&["a", "b", "c", "d"]);
        let start = engine.step("frame-1", Direction::Current, None, None).unwrap();
        engine.step("frame-1", Direction::Next, None, None).unwrap();
        let back = engine.step("frame-1", Direction::Previous, None, None).unwrap();
        assert_eq!(back.quote_id, start.quote_id);
    }

    #[test]
    fn test_random_moves() {
        let engine = engine(&["a", "b", "c"]);
        let mut current = engine.step("frame-1", Direction::Current, None, None).unwrap();
        for _ in 0..20 {
            let next = engine.step("frame-1", Direction::Random, None, None).unwrap();
            assert_ne!(next.quote_id, current.quote_id);
            current = next;
        }
    }

    #[test]
    fn test_empty_catalog() {
        let engine = engine(&[]);
        assert!(matches!(
            engine.step("frame-1", Direction::Next, None, None),
            Err(Error::EmptyCatalog)
        ));
        // The client still got registered
        assert_eq!(engine.get("frame-1").unwrap().rotation_length, 0);
    }

    #[test]
    fn test_update_position_out_of_range_changes_nothing() {
        let engine = engine(&["1", "2", "3"]);
        engine.register("frame-1", Some(800), Some(480)).unwrap();
        engine.step("frame-1", Direction::Next, None, None).unwrap();
        let before = engine.get("frame-1").unwrap();

        let update = ClientUpdate {
            width: Some(1024),
            position: Some(99),
            ..ClientUpdate::default()
        };
        assert!(matches!(
            engine.update("frame-1", &update),
            Err(Error::InvalidPosition { position: 99, len: 3 })
        ));
        assert_eq!(engine.get("frame-1").unwrap(), before);
    }

    #[test]
    fn test_update_applies_fields() {
        let engine = engine(&["1", "2", "3"]);
        engine.register("frame-1", None, None).unwrap();

        let info = engine
            .update(
                "frame-1",
                &ClientUpdate {
                    height: Some(600),
                    position: Some(2),
                    ..ClientUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(info.default_width, 800);
        assert_eq!(info.default_height, 600);
        assert_eq!(info.current_position, 2);
    }

    #[test]
    fn test_catalog_change_is_picked_up_lazily() {
        let engine = engine(&["1", "2", "3", "4"]);
        let current = engine.step("frame-1", Direction::Next, None, None).unwrap();

        let other = ["1", "2", "3", "4"]
            .into_iter()
            .find(|id| *id != current.quote_id)
            .unwrap();
        engine.store().delete_quote(other).unwrap();

        let after = engine.step("frame-1", Direction::Current, None, None).unwrap();
        assert_eq!(after.quote_id, current.quote_id);
        assert_eq!(engine.get("frame-1").unwrap().rotation_length, 3);
    }

    #[test]
    fn test_state_survives_engine_restart() {
        let store = store_with(&["1", "2", "3", "4", "5"]);
        let before = {
            let engine = RotationEngine::new(store.clone(), 800, 480);
            engine.step("frame-1", Direction::Next, Some(640), Some(400)).unwrap();
            engine.step("frame-1", Direction::Next, None, None).unwrap()
        };

        let engine = RotationEngine::new(store, 800, 480);
        let after = engine.step("frame-1", Direction::Current, None, None).unwrap();
        assert_eq!(after, before);
    }

    #[test]
    fn test_list_sorted() {
        let engine = engine(&["1"]);
        engine.register("b", None, None).unwrap();
        engine.register("a", None, None).unwrap();
        let names: Vec<String> = engine.list().unwrap().into_iter().map(|c| c.client_name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_concurrent_steps_are_serialized() {
        let ids: Vec<String> = (0..10).map(|i| format!("q{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let engine = Arc::new(engine(&refs));
        engine.register("frame-1", None, None).unwrap();

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        engine.step("frame-1", Direction::Next, None, None).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        // 20 advances over 10 quotes lands back at the start
        assert_eq!(engine.get("frame-1").unwrap().current_position, 0);
    }
}
