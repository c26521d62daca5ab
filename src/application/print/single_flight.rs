use std::{
    future::Future,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("in-flight work ended before producing a result")]
pub struct FlightAborted;

type FlightFuture<T> = Shared<BoxFuture<'static, Result<T, FlightAborted>>>;

struct Flight<T: Clone> {
    id: u64,
    outcome: FlightFuture<T>,
}

/// Whether a caller started the work or joined work already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    Leader,
    Joined,
}

/// Runs at most one unit of work per key at a time.
///
/// The first caller for a key registers a flight and spawns the work on its
/// own task; callers arriving while it runs await the same outcome. The
/// registration is removed as soon as the work finishes, panics or is
/// dropped, so the next caller after that starts fresh work.
pub struct SingleFlight<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    flights: Arc<DashMap<K, Flight<T>>>,
    next_id: AtomicU64,
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `work` for `key`, or join the run already in flight.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<T, FlightAborted>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.run_with_role(key, work).await.0
    }

    /// Like [`SingleFlight::run`], also reporting the caller's role.
    pub async fn run_with_role<F, Fut>(
        &self,
        key: K,
        work: F,
    ) -> (Result<T, FlightAborted>, FlightRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (outcome, leader) = match self.flights.entry(key.clone()) {
            Entry::Occupied(occupied) => (occupied.get().outcome.clone(), None),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel::<T>();
                let outcome = rx.map(|received| received.map_err(|_| FlightAborted));
                let outcome: FlightFuture<T> = outcome.boxed().shared();
                vacant.insert(Flight {
                    id,
                    outcome: outcome.clone(),
                });
                (outcome, Some((id, tx)))
            }
        };

        let role = match leader {
            Some((id, tx)) => {
                let registration = FlightRegistration {
                    key,
                    id,
                    flights: Arc::clone(&self.flights),
                };
                let work = work();
                tokio::spawn(async move {
                    let value = work.await;
                    drop(registration);
                    let _ = tx.send(value);
                });
                FlightRole::Leader
            }
            None => FlightRole::Joined,
        };

        (outcome.await, role)
    }

    /// Number of keys with work currently in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.flights.contains_key(key)
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the flight it was created for when dropped.
struct FlightRegistration<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    key: K,
    id: u64,
    flights: Arc<DashMap<K, Flight<T>>>,
}

impl<K, T> Drop for FlightRegistration<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    fn drop(&mut self) {
        self.flights.remove_if(&self.key, |_, flight| flight.id == self.id);
    }
}
