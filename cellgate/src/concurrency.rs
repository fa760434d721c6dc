//! Single-flight request collapsing.
//!
//! For every [`CacheKey`] at most one fetch is in flight. The first caller
//! starts it, later callers subscribe to the same broadcast channel and
//! receive a clone of its result.
//!
//! The fetch runs in its own task, so dropping any of the waiting futures
//! (a client disconnecting) neither cancels the fetch nor affects the other
//! waiters. The slot is released before the result is published, so a caller
//! arriving after release starts a new flight instead of subscribing to a
//! channel that will never send again.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cellgate_core::CacheKey;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::broadcast;
use tracing::{Instrument, debug, info_span};

use crate::error::ConcurrencyError;

#[cfg(feature = "metrics")]
use crate::metrics::SINGLE_FLIGHT_JOINED;

/// Role of a caller in a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// This caller started the fetch.
    Leader,
    /// This caller joined a fetch started by someone else.
    Follower,
}

/// A pending result of a single-flight fetch.
#[derive(Debug)]
pub struct Flight<Res> {
    role: FlightRole,
    receiver: broadcast::Receiver<Res>,
}

impl<Res: Clone> Flight<Res> {
    /// Whether this caller started the fetch.
    pub fn role(&self) -> FlightRole {
        self.role
    }

    /// Waits for the shared result.
    pub async fn wait(mut self) -> Result<Res, ConcurrencyError> {
        // A single message is ever sent on a capacity-1 channel, so the
        // receiver cannot lag.
        self.receiver
            .recv()
            .await
            .map_err(|_| ConcurrencyError::Closed)
    }
}

struct Slot<Res> {
    id: u64,
    sender: broadcast::Sender<Res>,
}

type Slots<Res> = Arc<DashMap<CacheKey, Slot<Res>>>;

/// Releases the slot when the fetch task ends, including by panic.
struct SlotGuard<Res> {
    slots: Slots<Res>,
    key: CacheKey,
    id: u64,
}

impl<Res> Drop for SlotGuard<Res> {
    fn drop(&mut self) {
        self.slots.remove_if(&self.key, |_, slot| slot.id == self.id);
    }
}

/// Broadcast-based single-flight manager.
pub struct ConcurrencyManager<Res> {
    slots: Slots<Res>,
    next_id: AtomicU64,
}

impl<Res> ConcurrencyManager<Res>
where
    Res: Clone + Send + 'static,
{
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Joins the flight for `key`, starting it with `fetch` if none is running.
    ///
    /// `fetch` is only invoked by the leader. It must be spawnable because it
    /// outlives the caller when the caller is dropped.
    pub fn run<F, Fut>(&self, key: &CacheKey, fetch: F) -> Flight<Res>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Res> + Send + 'static,
    {
        let (id, sender, receiver) = match self.slots.entry(key.clone()) {
            Entry::Occupied(slot) => {
                debug!(%key, "joining in-flight fetch");
                #[cfg(feature = "metrics")]
                metrics::counter!(*SINGLE_FLIGHT_JOINED).increment(1);
                return Flight {
                    role: FlightRole::Follower,
                    receiver: slot.get().sender.subscribe(),
                };
            }
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (sender, receiver) = broadcast::channel(1);
                vacant.insert(Slot {
                    id,
                    sender: sender.clone(),
                });
                (id, sender, receiver)
            }
        };

        let guard = SlotGuard {
            slots: Arc::clone(&self.slots),
            key: key.clone(),
            id,
        };
        let span = info_span!("single_flight", key = %key);
        let task = fetch();
        tokio::spawn(
            async move {
                let result = task.await;
                drop(guard);
                // No receivers left is fine: every waiter went away.
                let _ = sender.send(result);
            }
            .instrument(span),
        );

        Flight {
            role: FlightRole::Leader,
            receiver,
        }
    }

    /// Whether a fetch for `key` is currently running.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Number of running fetches.
    pub fn in_flight_count(&self) -> usize {
        self.slots.len()
    }
}

impl<Res> Default for ConcurrencyManager<Res>
where
    Res: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Res> std::fmt::Debug for ConcurrencyManager<Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyManager")
            .field("in_flight", &self.slots.len())
            .finish()
    }
}
