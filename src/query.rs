//! Keyed, observable resource cache.
//!
//! Each key holds at most one request in flight. Concurrent `fetch` calls for
//! the same key join it. Every request carries a generation; a result whose
//! generation has been superseded by a newer request is handed to its own
//! callers but never written into the cache. A result superseded only by
//! `invalidate` is still written, and the key stays stale.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::ClientResult;
use crate::sync::lock_or_recover;

pub enum QueryState<V> {
    /// Never fetched, or the query is disabled.
    Idle,
    Loading,
    Error(String),
    Success(Arc<V>),
}

impl<V> Clone for QueryState<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Idle => Self::Idle,
            Self::Loading => Self::Loading,
            Self::Error(message) => Self::Error(message.clone()),
            Self::Success(value) => Self::Success(Arc::clone(value)),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for QueryState<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Loading => f.write_str("Loading"),
            Self::Error(message) => f.debug_tuple("Error").field(message).finish(),
            Self::Success(value) => f.debug_tuple("Success").field(value).finish(),
        }
    }
}

impl<V> QueryState<V> {
    pub fn data(&self) -> Option<Arc<V>> {
        match self {
            Self::Success(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

type Flight<V> = watch::Receiver<Option<QueryState<V>>>;

struct Entry<V> {
    generation: u64,
    /// Generation of the result currently held in `state`.
    landed: u64,
    stale: bool,
    state: watch::Sender<QueryState<V>>,
    flight: Option<Flight<V>>,
}

impl<V> Entry<V> {
    fn new() -> Self {
        let (state, _) = watch::channel(QueryState::Idle);
        Self {
            generation: 0,
            landed: 0,
            stale: false,
            state,
            flight: None,
        }
    }

    /// A flight whose leader was dropped before finishing is abandoned.
    fn live_flight(&self) -> Option<Flight<V>> {
        self.flight
            .as_ref()
            .filter(|flight| flight.has_changed().is_ok())
            .cloned()
    }
}

enum Plan<V> {
    Ready(QueryState<V>),
    Join(Flight<V>),
    Lead(u64, watch::Sender<Option<QueryState<V>>>),
}

struct Inner<K, V> {
    next_generation: u64,
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn plan(&mut self, key: &K, force: bool) -> Plan<V> {
        self.next_generation += 1;
        let generation = self.next_generation;
        let entry = self.entries.entry(key.clone()).or_insert_with(Entry::new);

        if !force {
            if let Some(flight) = entry.live_flight() {
                return Plan::Join(flight);
            }
            let current = entry.state.borrow().clone();
            if matches!(current, QueryState::Success(_)) && !entry.stale {
                return Plan::Ready(current);
            }
        }

        let (done, flight) = watch::channel(None);
        entry.generation = generation;
        entry.stale = false;
        entry.flight = Some(flight);
        let has_data = matches!(*entry.state.borrow(), QueryState::Success(_));
        if !has_data {
            entry.state.send_replace(QueryState::Loading);
        }
        Plan::Lead(generation, done)
    }
}

pub struct QueryCache<K, V> {
    name: &'static str,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Eq + Hash + Clone, V> QueryCache<K, V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner {
                next_generation: 0,
                entries: HashMap::new(),
            }),
        }
    }

    /// Serves a fresh cached value, joins the request in flight, or starts a
    /// new one with `load`.
    pub async fn fetch<F, Fut>(&self, key: K, load: F) -> QueryState<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<V>>,
    {
        let plan = lock_or_recover(&self.inner).plan(&key, false);
        self.run(key, plan, load).await
    }

    /// Starts a new request even if one is in flight. The older request's
    /// result is discarded when it lands.
    pub async fn refetch<F, Fut>(&self, key: K, load: F) -> QueryState<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<V>>,
    {
        let plan = lock_or_recover(&self.inner).plan(&key, true);
        self.run(key, plan, load).await
    }

    /// Marks every key stale. Cached values stay visible until the next
    /// fetch replaces them. A request already in flight still lands unless a
    /// newer one starts first.
    pub fn invalidate(&self) {
        let mut inner = lock_or_recover(&self.inner);
        inner.next_generation += 1;
        let generation = inner.next_generation;
        for entry in inner.entries.values_mut() {
            entry.generation = generation;
            entry.stale = true;
            entry.flight = None;
        }
        tracing::debug!(query = self.name, keys = inner.entries.len(), "query invalidated");
    }

    pub fn state(&self, key: &K) -> QueryState<V> {
        lock_or_recover(&self.inner)
            .entries
            .get(key)
            .map(|entry| entry.state.borrow().clone())
            .unwrap_or(QueryState::Idle)
    }

    pub fn is_stale(&self, key: &K) -> bool {
        lock_or_recover(&self.inner)
            .entries
            .get(key)
            .is_some_and(|entry| entry.stale)
    }

    pub fn subscribe(&self, key: &K) -> watch::Receiver<QueryState<V>> {
        lock_or_recover(&self.inner)
            .entries
            .entry(key.clone())
            .or_insert_with(Entry::new)
            .state
            .subscribe()
    }

    async fn run<F, Fut>(&self, key: K, plan: Plan<V>, load: F) -> QueryState<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<V>>,
    {
        match plan {
            Plan::Ready(state) => state,
            Plan::Join(mut flight) => {
                let joined = match flight.wait_for(Option::is_some).await {
                    Ok(result) => result.clone(),
                    Err(_) => None,
                };
                joined.unwrap_or_else(|| self.state(&key))
            }
            Plan::Lead(generation, done) => {
                let result = match load().await {
                    Ok(value) => QueryState::Success(Arc::new(value)),
                    Err(error) => {
                        tracing::warn!(query = self.name, error = %error, "query failed");
                        QueryState::Error(error.to_string())
                    }
                };
                self.complete(&key, generation, &result);
                done.send_replace(Some(result.clone()));
                result
            }
        }
    }

    fn complete(&self, key: &K, generation: u64, result: &QueryState<V>) {
        let mut inner = lock_or_recover(&self.inner);
        let Some(entry) = inner.entries.get_mut(key) else {
            return;
        };
        if entry.generation != generation {
            // Only an invalidation came after this request: nothing newer
            // will land, so keep the result rather than stay in Loading.
            let unclaimed = entry.stale && entry.flight.is_none() && generation > entry.landed;
            if !unclaimed {
                tracing::debug!(
                    query = self.name,
                    generation,
                    current = entry.generation,
                    "discarding superseded result"
                );
                return;
            }
        } else {
            entry.flight = None;
        }
        entry.landed = generation;
        entry.state.send_replace(result.clone());
    }
}
