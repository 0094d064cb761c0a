// crates/core/src/registry.rs
//! Process-wide table of live sessions with holder counting and deferred
//! destruction.
//!
//! Two levels of locking:
//! - the table lock guards the map and every entry's `holders`/`closing`
//!   bookkeeping, and is only held for constant-time work;
//! - each session has its own FIFO gate, owned by at most one
//!   [`SessionLease`] at a time.
//!
//! A closed session leaves the table once its last lease is released. The
//! session itself (and with it any running job) is always dropped after the
//! table lock has been released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::JobCatalog;
use crate::config::RegistryConfig;
use crate::error::{ConfigError, RegistryError};
use crate::id::{IdGenerator, SessionId};
use crate::session::{Session, SessionBadge, SessionRequest, SessionView};

// -- Session gate ------------------------------------------------------------

/// Identifies one successful acquire. Checked again at release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LeaseToken(u64);

struct GateState {
    next_ticket: u64,
    now_serving: u64,
    holder: Option<LeaseToken>,
}

/// Exclusive lock granted in arrival order.
struct SessionGate {
    state: Mutex<GateState>,
    turn: Condvar,
}

impl SessionGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                next_ticket: 0,
                now_serving: 0,
                holder: None,
            }),
            turn: Condvar::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self, token: LeaseToken) {
        let mut state = self.lock_state();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let mut state = self
            .turn
            .wait_while(state, |s| s.now_serving != ticket || s.holder.is_some())
            .unwrap_or_else(PoisonError::into_inner);
        state.holder = Some(token);
    }

    /// # Panics
    ///
    /// If `token` does not currently own the gate.
    fn unlock(&self, token: LeaseToken) {
        let mut state = self.lock_state();
        assert_eq!(
            state.holder,
            Some(token),
            "session lock released by a lease that does not own it"
        );
        state.holder = None;
        state.now_serving += 1;
        drop(state);
        self.turn.notify_all();
    }
}

struct SessionCell {
    gate: SessionGate,
    session: Mutex<Session>,
    badge: Arc<SessionBadge>,
}

struct Entry {
    owner: String,
    cell: Arc<SessionCell>,
    /// Leases handed out plus acquirers waiting on the gate.
    holders: usize,
    closing: bool,
    created_at: DateTime<Utc>,
}

impl Entry {
    fn is_live_for(&self, owner: &str) -> bool {
        self.owner == owner && !self.closing
    }
}

// -- Public types ------------------------------------------------------------

/// Read-only snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub owner: String,
    pub session_id: SessionId,
    pub display_name: String,
    pub is_locked: bool,
    /// Leases out plus acquirers queued on the session lock.
    pub holders: usize,
    pub is_job_running: bool,
    pub is_closing: bool,
    pub created_at: DateTime<Utc>,
}

/// Where a request that names no session ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Landing {
    /// The owner had no live session; this one was just created.
    Created(SessionId),
    /// The owner's only live session.
    Sole(SessionId),
    /// Several live sessions, oldest first, for the owner to pick from.
    Choose(Vec<SessionSummary>),
}

type Table = HashMap<SessionId, Entry>;

pub struct SessionRegistry {
    table: Mutex<Table>,
    config: RegistryConfig,
    catalog: Arc<JobCatalog>,
    next_token: AtomicU64,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, catalog: Arc<JobCatalog>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            table: Mutex::new(HashMap::new()),
            config,
            catalog,
            next_token: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<JobCatalog> {
        &self.catalog
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh session for `owner` and return its identifier.
    pub fn create(&self, owner: &str) -> Result<SessionId, RegistryError> {
        self.create_named(owner, None)
    }

    /// Like [`create`](Self::create) with an initial display name.
    pub fn create_named(
        &self,
        owner: &str,
        display_name: Option<String>,
    ) -> Result<SessionId, RegistryError> {
        self.insert(&mut self.table(), owner, display_name)
    }

    fn insert(
        &self,
        table: &mut Table,
        owner: &str,
        display_name: Option<String>,
    ) -> Result<SessionId, RegistryError> {
        let id = IdGenerator::new(&self.config)
            .generate(&mut rand::thread_rng(), |candidate| table.contains_key(candidate))?;

        let session = Session::new(
            id.clone(),
            owner,
            display_name,
            &self.config.session,
            self.catalog.clone(),
        );
        let badge = session.badge();
        table.insert(
            id.clone(),
            Entry {
                owner: owner.to_string(),
                cell: Arc::new(SessionCell {
                    gate: SessionGate::new(),
                    session: Mutex::new(session),
                    badge,
                }),
                holders: 0,
                closing: false,
                created_at: Utc::now(),
            },
        );
        info!(session_id = %id, owner, sessions = table.len(), "session created");
        Ok(id)
    }

    /// Resolve a request from `owner` that names no session: create the first
    /// one, pick the only one, or list them. Decided under one table lock, so
    /// concurrent first requests share a single new session.
    pub fn land(&self, owner: &str) -> Result<Landing, RegistryError> {
        let mut table = self.table();
        let mut live: Vec<SessionId> = table
            .iter()
            .filter(|(_, entry)| entry.is_live_for(owner))
            .map(|(id, _)| id.clone())
            .collect();
        match live.len() {
            0 => {
                let id = self.insert(&mut table, owner, None)?;
                Ok(Landing::Created(id))
            }
            1 => Ok(Landing::Sole(live.swap_remove(0))),
            _ => Ok(Landing::Choose(summarize(&table, |entry| {
                entry.is_live_for(owner)
            }))),
        }
    }

    /// Take exclusive use of a session, blocking behind earlier acquirers.
    ///
    /// `None` if the session is unknown or closing.
    pub fn acquire(&self, id: &str) -> Option<SessionLease<'_>> {
        self.acquire_inner(id, None)
    }

    /// Like [`acquire`](Self::acquire), but also `None` for a session that
    /// belongs to someone else.
    pub fn acquire_for(&self, owner: &str, id: &str) -> Option<SessionLease<'_>> {
        self.acquire_inner(id, Some(owner))
    }

    fn acquire_inner(&self, id: &str, owner: Option<&str>) -> Option<SessionLease<'_>> {
        let (cell, token) = {
            let mut table = self.table();
            let entry = table.get_mut(id)?;
            if entry.closing || owner.is_some_and(|owner| owner != entry.owner) {
                return None;
            }
            entry.holders += 1;
            let token = LeaseToken(self.next_token.fetch_add(1, Ordering::Relaxed));
            (entry.cell.clone(), token)
        };

        // A close that lands while this caller is queued still lets it
        // through; it already counts as a holder.
        cell.gate.lock(token);
        debug!(session_id = %id, token = token.0, "session lease acquired");
        Some(SessionLease {
            registry: self,
            id: id.to_string(),
            cell: Some(cell),
            token,
        })
    }

    /// Give back a lease. Equivalent to dropping it.
    ///
    /// # Panics
    ///
    /// If the lease was handed out by a different registry.
    pub fn release(&self, lease: SessionLease<'_>) {
        assert!(
            std::ptr::eq(lease.registry, self),
            "session lease released on a registry that did not issue it"
        );
        drop(lease);
    }

    fn release_inner(&self, id: &str, cell: Arc<SessionCell>, token: LeaseToken) {
        let doomed = {
            let mut table = self.table();
            let Some(entry) = table.get_mut(id) else {
                panic!("session {id} released after leaving the registry");
            };
            assert!(entry.holders > 0, "session {id} released with no holders");
            entry.holders -= 1;
            cell.gate.unlock(token);
            debug!(session_id = %id, token = token.0, holders = entry.holders, "session lease released");
            if entry.holders == 0 && entry.closing {
                table.remove(id)
            } else {
                None
            }
        };
        if doomed.is_some() {
            info!(session_id = %id, "closed session released by its last holder");
        }
        drop(doomed);
        drop(cell);
    }

    /// Mark a session closing. Destroys it now when unheld, otherwise when
    /// the last lease is released.
    ///
    /// Returns false for an unknown identifier; closing twice is a no-op.
    pub fn close(&self, id: &str) -> bool {
        self.close_inner(id, None)
    }

    /// Like [`close`](Self::close), but false for a session that belongs to
    /// someone else. Ownership and closing are decided under one lock.
    pub fn close_for(&self, owner: &str, id: &str) -> bool {
        self.close_inner(id, Some(owner))
    }

    fn close_inner(&self, id: &str, owner: Option<&str>) -> bool {
        let doomed = {
            let mut table = self.table();
            let Some(entry) = table.get_mut(id) else {
                return false;
            };
            if owner.is_some_and(|owner| owner != entry.owner) {
                return false;
            }
            if entry.closing {
                return true;
            }
            entry.closing = true;
            info!(session_id = %id, owner = %entry.owner, holders = entry.holders, "session closing");
            if entry.holders == 0 {
                table.remove(id)
            } else {
                None
            }
        };
        drop(doomed);
        true
    }

    /// Close every session of `owner`. Returns how many were newly marked.
    pub fn close_all_for(&self, owner: &str) -> usize {
        let marked = self.close_where(|entry| entry.owner == owner);
        info!(owner, closed = marked, "closed all sessions of owner");
        marked
    }

    /// Close every session, e.g. on shutdown.
    pub fn close_all(&self) -> usize {
        let marked = self.close_where(|_| true);
        info!(closed = marked, "closed all sessions");
        marked
    }

    fn close_where(&self, matches: impl Fn(&Entry) -> bool) -> usize {
        let (marked, doomed) = {
            let mut table = self.table();
            let mut marked = 0;
            let mut idle = Vec::new();
            for (id, entry) in table.iter_mut() {
                if entry.closing || !matches(entry) {
                    continue;
                }
                entry.closing = true;
                marked += 1;
                if entry.holders == 0 {
                    idle.push(id.clone());
                }
            }
            let doomed: Vec<Entry> = idle.iter().filter_map(|id| table.remove(id)).collect();
            (marked, doomed)
        };
        drop(doomed);
        marked
    }

    pub fn list_summaries(&self) -> Vec<SessionSummary> {
        self.summaries(|_| true)
    }

    pub fn summaries_for(&self, owner: &str) -> Vec<SessionSummary> {
        self.summaries(|entry| entry.owner == owner)
    }

    fn summaries(&self, keep: impl Fn(&Entry) -> bool) -> Vec<SessionSummary> {
        summarize(&self.table(), keep)
    }

    /// Sessions of `owner` that are not closing.
    pub fn count_for(&self, owner: &str) -> usize {
        self.table()
            .values()
            .filter(|entry| entry.is_live_for(owner))
            .count()
    }

    pub fn owner_of(&self, id: &str) -> Option<String> {
        self.table().get(id).map(|entry| entry.owner.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table().contains_key(id)
    }

    pub fn is_closing(&self, id: &str) -> bool {
        self.table().get(id).is_some_and(|entry| entry.closing)
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

fn summarize(table: &Table, keep: impl Fn(&Entry) -> bool) -> Vec<SessionSummary> {
    let mut summaries: Vec<SessionSummary> = table
        .iter()
        .filter(|(_, entry)| keep(entry))
        .map(|(id, entry)| SessionSummary {
            owner: entry.owner.clone(),
            session_id: id.clone(),
            display_name: entry.cell.badge.display_name(),
            is_locked: entry.holders > 0,
            holders: entry.holders,
            is_job_running: entry.cell.badge.is_job_running(),
            is_closing: entry.closing,
            created_at: entry.created_at,
        })
        .collect();
    summaries.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    summaries
}

/// Exclusive use of one session. Released on drop.
pub struct SessionLease<'r> {
    registry: &'r SessionRegistry,
    id: SessionId,
    cell: Option<Arc<SessionCell>>,
    token: LeaseToken,
}

impl SessionLease<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn cell(&self) -> &SessionCell {
        match &self.cell {
            Some(cell) => cell,
            None => unreachable!("session lease used after release"),
        }
    }

    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.cell()
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle(&self, request: SessionRequest) -> SessionView {
        self.session().handle(request)
    }

    pub fn is_closing(&self) -> bool {
        self.registry.is_closing(&self.id)
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            self.registry.release_inner(&self.id, cell, self.token);
        }
    }
}
