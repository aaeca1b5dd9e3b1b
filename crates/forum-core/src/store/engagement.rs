use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::{EngagementUpdate, LikeState, UpdatePhase};
use crate::gateway::{EngagementGateway, GatewayError, IdentityProvider};
use crate::models::{Identity, Thread};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("thread id must not be empty")]
    InvalidThread,
    #[error("please sign in to like threads")]
    Unauthenticated,
    #[error("a like change for thread {thread_id} is already in progress")]
    OperationInProgress { thread_id: String },
    #[error("could not save like change: {0}")]
    RemoteMutationFailed(#[source] GatewayError),
    #[error("could not load likes: {0}")]
    HydrationFailed(#[source] GatewayError),
    #[error("like change for thread {thread_id} was aborted")]
    Aborted { thread_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Like,
    Unlike,
}

/// Everything needed to finish or undo one optimistic toggle.
#[derive(Debug)]
struct Ticket {
    thread_id: String,
    direction: Direction,
    epoch: u64,
    prior_liked: bool,
    prior_count: u64,
    /// Value written to the remote counter and shown locally meanwhile.
    target_count: u64,
}

impl Ticket {
    fn optimistic_state(&self) -> LikeState {
        LikeState {
            liked: self.direction == Direction::Like,
            like_count: self.target_count,
        }
    }
}

/// Local copy of the current user's likes and of every rendered thread's counter.
#[derive(Default)]
struct Mirror {
    /// Identity the liked set belongs to
    owner: Option<Identity>,
    /// Bumped whenever `owner` changes; toggles from an older epoch settle silently
    epoch: u64,
    liked: HashSet<String>,
    counts: HashMap<String, u64>,
    /// Threads with a toggle in flight for `owner`
    pending: HashSet<String>,
    /// Count of settled toggles for `owner`
    settles: u64,
    /// Value of `settles` right after each thread's latest toggle settled
    settled_at: HashMap<String, u64>,
}

impl Mirror {
    /// Hand the liked set to `identity`. Returns the threads that were un-liked by the switch.
    fn adopt(&mut self, identity: Option<&Identity>) -> Vec<String> {
        if self.owner.as_ref() == identity {
            return Vec::new();
        }
        self.owner = identity.cloned();
        self.epoch += 1;
        self.pending.clear();
        self.settled_at.clear();
        self.liked.drain().collect()
    }

    /// End the in-flight toggle for `thread_id`.
    fn settle(&mut self, thread_id: &str) {
        self.pending.remove(thread_id);
        self.settles += 1;
        self.settled_at.insert(thread_id.to_string(), self.settles);
    }

    /// Local membership is newer than any server snapshot taken at `since`.
    fn changed_locally_since(&self, thread_id: &str, since: u64) -> bool {
        self.pending.contains(thread_id)
            || self
                .settled_at
                .get(thread_id)
                .is_some_and(|&settled| settled > since)
    }

    fn state(&self, thread_id: &str) -> Option<LikeState> {
        self.counts.get(thread_id).map(|&like_count| LikeState {
            liked: self.liked.contains(thread_id),
            like_count,
        })
    }
}

/// Clears the pending mark and undoes the optimistic change if the remote half
/// of a toggle never reports back (task aborted or panicked).
struct SettleGuard<'a> {
    sync: &'a EngagementSync,
    ticket: &'a Ticket,
    armed: bool,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(thread_id = %self.ticket.thread_id, "like change abandoned, rolling back");
            self.sync.roll_back(self.ticket, None);
        }
    }
}

/// Keeps the current user's likes and the per-thread like counters consistent
/// with the backend.
///
/// The backend offers no atomic toggle, so every toggle is applied locally
/// first, then written as two sequential remote calls (edge, then counter).
/// If either call fails the local change is undone. At most one toggle per
/// thread is in flight for the current identity.
pub struct EngagementSync {
    gateway: Arc<dyn EngagementGateway>,
    identity: Arc<dyn IdentityProvider>,
    mirror: Mutex<Mirror>,
    updates: broadcast::Sender<EngagementUpdate>,
}

impl EngagementSync {
    pub fn new(
        gateway: Arc<dyn EngagementGateway>,
        identity: Arc<dyn IdentityProvider>,
        update_capacity: usize,
    ) -> Self {
        let (updates, _) = broadcast::channel(update_capacity.max(1));
        Self {
            gateway,
            identity,
            mirror: Mutex::new(Mirror::default()),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngagementUpdate> {
        self.updates.subscribe()
    }

    // ===== Query Methods =====

    pub fn is_liked(&self, thread_id: &str) -> bool {
        self.mirror.lock().liked.contains(thread_id)
    }

    pub fn like_count(&self, thread_id: &str) -> Option<u64> {
        self.mirror.lock().counts.get(thread_id).copied()
    }

    pub fn is_pending(&self, thread_id: &str) -> bool {
        self.mirror.lock().pending.contains(thread_id)
    }

    pub fn liked_threads(&self) -> Vec<String> {
        let mut liked: Vec<String> = self.mirror.lock().liked.iter().cloned().collect();
        liked.sort();
        liked
    }

    /// Like state of a thread, preferring the mirrored counter over the row's.
    pub fn view(&self, thread: &Thread) -> LikeState {
        let mirror = self.mirror.lock();
        LikeState {
            liked: mirror.liked.contains(&thread.id),
            like_count: mirror
                .counts
                .get(&thread.id)
                .copied()
                .unwrap_or_else(|| thread.like_count()),
        }
    }

    // ===== Mirror Maintenance =====

    /// Record the counter of a thread as just read from the backend.
    /// Threads with a toggle in flight keep their optimistic value.
    pub fn observe(&self, thread_id: &str, like_count: u64) {
        let mut mirror = self.mirror.lock();
        if !mirror.pending.contains(thread_id) {
            mirror.counts.insert(thread_id.to_string(), like_count);
        }
    }

    pub fn observe_threads(&self, threads: &[Thread]) {
        let mut mirror = self.mirror.lock();
        for thread in threads {
            if !mirror.pending.contains(&thread.id) {
                mirror.counts.insert(thread.id.clone(), thread.like_count());
            }
        }
    }

    /// Drop everything known about a deleted thread.
    pub fn forget(&self, thread_id: &str) {
        let mut mirror = self.mirror.lock();
        mirror.counts.remove(thread_id);
        mirror.liked.remove(thread_id);
    }

    // ===== Toggle =====

    /// Like or unlike `thread_id` for the current identity.
    ///
    /// `known_count` is the counter the caller last saw; the remote counter is
    /// set to `known_count ± 1` (never below zero). The remote writes run on
    /// their own task, so dropping this future does not cancel them.
    pub async fn toggle(
        self: &Arc<Self>,
        thread_id: &str,
        known_count: u64,
    ) -> Result<LikeState, SyncError> {
        if thread_id.is_empty() {
            return Err(SyncError::InvalidThread);
        }
        let identity = self
            .identity
            .current_identity()
            .ok_or(SyncError::Unauthenticated)?;
        let ticket = self.begin(&identity, thread_id, known_count)?;

        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.complete(identity, ticket).await });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(thread_id, error = %e, "like change task failed");
                Err(SyncError::Aborted {
                    thread_id: thread_id.to_string(),
                })
            }
        }
    }

    /// Check-and-mark plus the optimistic update, with no suspension point in between.
    fn begin(
        &self,
        identity: &Identity,
        thread_id: &str,
        known_count: u64,
    ) -> Result<Ticket, SyncError> {
        let mut mirror = self.mirror.lock();
        let cleared = mirror.adopt(Some(identity));
        self.publish_all(&mirror, &cleared, UpdatePhase::Hydrated);

        if !mirror.pending.insert(thread_id.to_string()) {
            return Err(SyncError::OperationInProgress {
                thread_id: thread_id.to_string(),
            });
        }

        let prior_liked = mirror.liked.contains(thread_id);
        let prior_count = mirror.counts.get(thread_id).copied().unwrap_or(known_count);
        let (direction, target_count) = if prior_liked {
            (Direction::Unlike, known_count.saturating_sub(1))
        } else {
            (Direction::Like, known_count.saturating_add(1))
        };

        match direction {
            Direction::Like => mirror.liked.insert(thread_id.to_string()),
            Direction::Unlike => mirror.liked.remove(thread_id),
        };
        mirror.counts.insert(thread_id.to_string(), target_count);

        let ticket = Ticket {
            thread_id: thread_id.to_string(),
            direction,
            epoch: mirror.epoch,
            prior_liked,
            prior_count,
            target_count,
        };
        debug!(thread_id, ?direction, target_count, "optimistic like change");
        self.publish(&ticket.thread_id, ticket.optimistic_state(), UpdatePhase::Optimistic);
        Ok(ticket)
    }

    async fn complete(&self, identity: Identity, ticket: Ticket) -> Result<LikeState, SyncError> {
        let mut guard = SettleGuard {
            sync: self,
            ticket: &ticket,
            armed: true,
        };
        let outcome = self.push(&identity, &ticket).await;
        guard.armed = false;
        drop(guard);

        match outcome {
            Ok(()) => Ok(self.confirm(&ticket)),
            Err(err) => {
                self.roll_back(&ticket, Some(&err));
                Err(SyncError::RemoteMutationFailed(err))
            }
        }
    }

    /// Edge first, counter second. The counter write only starts once the edge write settled.
    async fn push(&self, identity: &Identity, ticket: &Ticket) -> Result<(), GatewayError> {
        match ticket.direction {
            Direction::Like => {
                self.gateway
                    .insert_like_edge(identity, &ticket.thread_id)
                    .await?
            }
            Direction::Unlike => {
                self.gateway
                    .delete_like_edge(identity, &ticket.thread_id)
                    .await?
            }
        }
        self.gateway
            .set_thread_like_count(&ticket.thread_id, ticket.target_count)
            .await
    }

    fn confirm(&self, ticket: &Ticket) -> LikeState {
        let mut mirror = self.mirror.lock();
        if mirror.epoch != ticket.epoch {
            debug!(thread_id = %ticket.thread_id, "identity changed during like change");
            return ticket.optimistic_state();
        }
        mirror.settle(&ticket.thread_id);
        let state = ticket.optimistic_state();
        info!(thread_id = %ticket.thread_id, liked = state.liked, like_count = state.like_count, "like change saved");
        self.publish(&ticket.thread_id, state, UpdatePhase::Confirmed);
        state
    }

    /// Restore the pre-toggle membership and counter.
    ///
    /// A duplicate-edge rejection proves the edge exists remotely, so membership
    /// converges to liked instead of reverting to a state the backend contradicts.
    fn roll_back(&self, ticket: &Ticket, cause: Option<&GatewayError>) {
        let mut mirror = self.mirror.lock();
        if mirror.epoch != ticket.epoch {
            debug!(thread_id = %ticket.thread_id, "identity changed during like change");
            return;
        }
        mirror.settle(&ticket.thread_id);

        let liked = match cause {
            Some(GatewayError::DuplicateLike { .. }) => true,
            _ => ticket.prior_liked,
        };
        if liked {
            mirror.liked.insert(ticket.thread_id.clone());
        } else {
            mirror.liked.remove(&ticket.thread_id);
        }
        mirror
            .counts
            .insert(ticket.thread_id.clone(), ticket.prior_count);

        if let Some(cause) = cause {
            warn!(thread_id = %ticket.thread_id, error = %cause, "like change failed, rolled back");
        }
        self.publish(
            &ticket.thread_id,
            LikeState {
                liked,
                like_count: ticket.prior_count,
            },
            UpdatePhase::RolledBack,
        );
    }

    // ===== Hydrate =====

    /// Reload the liked set for `identity`, or clear it when signed out.
    ///
    /// Threads with a toggle in flight, or one that settled while the query
    /// ran, keep their local membership. On failure the liked set stays as it was.
    pub async fn hydrate(&self, identity: Option<&Identity>) -> Result<(), SyncError> {
        let (epoch, since) = {
            let mut mirror = self.mirror.lock();
            let cleared = mirror.adopt(identity);
            self.publish_all(&mirror, &cleared, UpdatePhase::Hydrated);
            (mirror.epoch, mirror.settles)
        };
        let Some(identity) = identity else {
            debug!("likes cleared for anonymous session");
            return Ok(());
        };

        let edges = self
            .gateway
            .query_like_edges(identity)
            .await
            .map_err(|e| {
                warn!(user_id = %identity, error = %e, "failed to load likes");
                SyncError::HydrationFailed(e)
            })?;

        let mut mirror = self.mirror.lock();
        if mirror.epoch != epoch {
            debug!(user_id = %identity, "identity changed while loading likes, discarding");
            return Ok(());
        }

        let mut next: HashSet<String> = edges.into_iter().map(|edge| edge.forum_id).collect();
        let local: Vec<&String> = mirror
            .pending
            .iter()
            .chain(mirror.settled_at.keys())
            .filter(|thread_id| mirror.changed_locally_since(thread_id, since))
            .collect();
        for thread_id in local {
            if mirror.liked.contains(thread_id) {
                next.insert(thread_id.clone());
            } else {
                next.remove(thread_id);
            }
        }
        let changed: Vec<String> = next
            .symmetric_difference(&mirror.liked)
            .cloned()
            .collect();
        mirror.liked = next;

        info!(user_id = %identity, liked = mirror.liked.len(), changed = changed.len(), "likes loaded");
        self.publish_all(&mirror, &changed, UpdatePhase::Hydrated);
        Ok(())
    }

    // ===== Notifications =====

    fn publish(&self, thread_id: &str, state: LikeState, phase: UpdatePhase) {
        // No receivers is fine: nobody is rendering right now.
        let _ = self.updates.send(EngagementUpdate {
            thread_id: thread_id.to_string(),
            liked: state.liked,
            like_count: state.like_count,
            phase,
        });
    }

    /// Only threads with a known counter are announced; others were never rendered.
    fn publish_all(&self, mirror: &Mirror, thread_ids: &[String], phase: UpdatePhase) {
        for thread_id in thread_ids {
            if let Some(state) = mirror.state(thread_id) {
                self.publish(thread_id, state, phase);
            }
        }
    }
}
