//! In-flight request table.
//!
//! Every query this node has seen, whether it originated here or arrived
//! from a peer, is tracked by its request ID until it expires. The entry
//! remembers who must receive the answer and which peers have already been
//! tried.
//!
//! ## Lifecycle
//!
//! ```text
//!            begin_attempt             claim_reply (not-found)
//! Searching ─────────────► AwaitingReply ─────────────► Searching ─► ...
//!     │                         │      claim_attempt (deadline / send failure)
//!     └──────── resolve ────────┴──────► Resolved ──(resolved_ttl)──► swept
//! ```
//!
//! Replies are matched by request ID only: a not-found ends whatever
//! attempt is outstanding, whichever address the refusing peer signs with.
//! Timers and send failures name the attempt number they belong to, so a
//! deadline left over from an earlier attempt never ends a later one.
//!
//! The compound operations (`try_add`, `begin_attempt`, `claim_reply`,
//! `claim_attempt`, `resolve`) each run in a single critical section, so at
//! most one task drives the search loop for a given request at any time.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use signpost_store::Location;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Terminal result of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// A holder was reported.
    Found { holder: String },
    /// Every candidate neighbor refused.
    Exhausted,
}

/// Where a request is in the routing state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestState {
    /// Choosing the next neighbor to ask.
    Searching,
    /// A query was handed to `peer`; waiting for its answer.
    AwaitingReply { peer: String },
    /// Answered or exhausted.
    Resolved(Resolution),
}

/// One tracked request.
#[derive(Clone, Debug)]
pub struct TrackedRequest {
    /// The key being searched for.
    pub key: String,
    /// [`Location::Local`] if this node asked, otherwise the peer to answer.
    pub answer_to: Location,
    /// Peers already tried, in the order they were tried. Only grows.
    pub visited: Vec<String>,
    pub state: RequestState,
    /// Number of queries sent so far; identifies the outstanding attempt.
    pub attempt: u64,
    /// When whoever asked stops waiting. `None` for local searches.
    pub deadline: Option<Instant>,
    pub created_at: Instant,
    pub updated_at: Instant,
}

impl TrackedRequest {
    fn new(
        key: &str,
        answer_to: Location,
        visited: Vec<String>,
        deadline: Option<Instant>,
    ) -> Self {
        let now = Instant::now();
        Self {
            key: key.to_string(),
            answer_to,
            visited,
            state: RequestState::Searching,
            attempt: 0,
            deadline,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, RequestState::Resolved(_))
    }

    fn touch(&mut self) {
        self.updated_at = Instant::now();
    }
}

/// Concurrent table of tracked requests keyed by request ID.
#[derive(Debug, Default)]
pub struct RequestTracker {
    requests: RwLock<HashMap<String, TrackedRequest>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request, replacing any entry with the same ID.
    pub fn add(&self, request_id: &str, key: &str, answer_to: Location, visited: Vec<String>) {
        debug!(%request_id, %key, %answer_to, "request tracked");
        self.write().insert(
            request_id.to_string(),
            TrackedRequest::new(key, answer_to, visited, None),
        );
    }

    /// Track a request unless the ID is already known.
    ///
    /// `deadline` is when the asker stops waiting for an answer.
    /// Returns `false` for a duplicate; the existing entry is left untouched.
    pub fn try_add(
        &self,
        request_id: &str,
        key: &str,
        answer_to: Location,
        visited: Vec<String>,
        deadline: Option<Instant>,
    ) -> bool {
        let mut requests = self.write();
        if requests.contains_key(request_id) {
            return false;
        }
        debug!(%request_id, %key, %answer_to, "request tracked");
        requests.insert(
            request_id.to_string(),
            TrackedRequest::new(key, answer_to, visited, deadline),
        );
        true
    }

    pub fn get(&self, request_id: &str) -> Option<TrackedRequest> {
        self.read().get(request_id).cloned()
    }

    /// Replace an existing entry.
    ///
    /// Returns `false` (and logs) if the ID is not tracked; nothing is inserted.
    pub fn update(&self, request_id: &str, mut request: TrackedRequest) -> bool {
        let mut requests = self.write();
        match requests.get_mut(request_id) {
            Some(slot) => {
                request.touch();
                *slot = request;
                true
            }
            None => {
                warn!(%request_id, "update of untracked request ignored");
                false
            }
        }
    }

    pub fn remove(&self, request_id: &str) -> Option<TrackedRequest> {
        let removed = self.write().remove(request_id);
        if removed.is_some() {
            debug!(%request_id, "request removed");
        }
        removed
    }

    /// Record that a query for `request_id` is about to go to `peer`.
    ///
    /// Appends `peer` to the visited set and moves the request to
    /// [`RequestState::AwaitingReply`]. Only succeeds from
    /// [`RequestState::Searching`]; returns the new attempt number, or
    /// `None` otherwise.
    pub fn begin_attempt(&self, request_id: &str, peer: &str) -> Option<u64> {
        let mut requests = self.write();
        let request = requests.get_mut(request_id)?;
        if request.state != RequestState::Searching {
            return None;
        }
        if !request.visited.iter().any(|v| v == peer) {
            request.visited.push(peer.to_string());
        }
        request.attempt += 1;
        request.state = RequestState::AwaitingReply {
            peer: peer.to_string(),
        };
        request.touch();
        Some(request.attempt)
    }

    /// Take back a request on a refusal.
    ///
    /// Whatever attempt is outstanding ends: the request moves back to
    /// [`RequestState::Searching`] and the updated entry is returned.
    /// Requests that are searching, resolved or unknown return `None`.
    pub fn claim_reply(&self, request_id: &str) -> Option<TrackedRequest> {
        let mut requests = self.write();
        let request = requests.get_mut(request_id)?;
        if !matches!(request.state, RequestState::AwaitingReply { .. }) {
            return None;
        }
        request.state = RequestState::Searching;
        request.touch();
        Some(request.clone())
    }

    /// Take back a request only if `attempt` is still the outstanding one.
    ///
    /// Used by reply deadlines and failed sends, which belong to one
    /// specific attempt.
    pub fn claim_attempt(&self, request_id: &str, attempt: u64) -> Option<TrackedRequest> {
        let mut requests = self.write();
        let request = requests.get_mut(request_id)?;
        if request.attempt != attempt
            || !matches!(request.state, RequestState::AwaitingReply { .. })
        {
            return None;
        }
        request.state = RequestState::Searching;
        request.touch();
        Some(request.clone())
    }

    /// Mark a request resolved.
    ///
    /// Returns the entry as it was before resolution, or `None` if the
    /// request is unknown or was already resolved.
    pub fn resolve(&self, request_id: &str, resolution: Resolution) -> Option<TrackedRequest> {
        let mut requests = self.write();
        let request = requests.get_mut(request_id)?;
        if request.is_resolved() {
            return None;
        }
        let before = request.clone();
        request.state = RequestState::Resolved(resolution);
        request.touch();
        Some(before)
    }

    /// Record an answer that arrived after the request gave up.
    ///
    /// A request resolved as [`Resolution::Exhausted`] becomes
    /// [`Resolution::Found`] and its entry is returned; anything else
    /// returns `None`, so each late answer is acted on at most once.
    pub fn resolve_late(&self, request_id: &str, holder: &str) -> Option<TrackedRequest> {
        let mut requests = self.write();
        let request = requests.get_mut(request_id)?;
        if request.state != RequestState::Resolved(Resolution::Exhausted) {
            return None;
        }
        request.state = RequestState::Resolved(Resolution::Found {
            holder: holder.to_string(),
        });
        request.touch();
        Some(request.clone())
    }

    /// Drop expired entries and return them.
    ///
    /// Resolved entries expire `resolved_ttl` after resolution; any other
    /// entry expires after `pending_ttl` without activity.
    pub fn sweep(
        &self,
        now: Instant,
        resolved_ttl: Duration,
        pending_ttl: Duration,
    ) -> Vec<(String, TrackedRequest)> {
        let mut requests = self.write();
        let expired: Vec<String> = requests
            .iter()
            .filter(|(_, r)| {
                let idle = now.saturating_duration_since(r.updated_at);
                if r.is_resolved() {
                    idle >= resolved_ttl
                } else {
                    idle >= pending_ttl
                }
            })
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| requests.remove(&id).map(|r| (id, r)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TrackedRequest>> {
        self.requests.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TrackedRequest>> {
        self.requests.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(addr: &str) -> Location {
        Location::Peer(addr.to_string())
    }

    #[test]
    fn test_add_get_remove() {
        let tracker = RequestTracker::new();
        tracker.add("r1", "movie", Location::Local, Vec::new());

        let req = tracker.get("r1").expect("tracked");
        assert_eq!(req.key, "movie");
        assert_eq!(req.answer_to, Location::Local);
        assert!(req.visited.is_empty());
        assert_eq!(req.state, RequestState::Searching);

        assert!(tracker.remove("r1").is_some());
        assert!(tracker.get("r1").is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_try_add_refuses_duplicates() {
        let tracker = RequestTracker::new();
        assert!(tracker.try_add("r1", "k", peer("a:1"), vec!["a:1".to_string()], None));
        assert!(!tracker.try_add("r1", "other", peer("b:1"), vec!["b:1".to_string()], None));

        let req = tracker.get("r1").expect("tracked");
        assert_eq!(req.answer_to, peer("a:1"));
        assert_eq!(req.key, "k");
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_update_requires_existing_entry() {
        let tracker = RequestTracker::new();
        tracker.add("r1", "k", Location::Local, Vec::new());

        let mut req = tracker.get("r1").expect("tracked");
        req.visited.push("x:1".to_string());
        assert!(tracker.update("r1", req.clone()));
        assert_eq!(tracker.get("r1").expect("tracked").visited, vec!["x:1"]);

        assert!(!tracker.update("missing", req));
        assert!(tracker.get("missing").is_none());
    }

    #[test]
    fn test_attempt_and_claim_cycle() {
        let tracker = RequestTracker::new();
        tracker.add("r1", "k", Location::Local, Vec::new());

        assert_eq!(tracker.begin_attempt("r1", "p1:1"), Some(1));
        // A second driver cannot start while the first attempt is pending.
        assert_eq!(tracker.begin_attempt("r1", "p2:1"), None);
        assert_eq!(
            tracker.get("r1").expect("tracked").state,
            RequestState::AwaitingReply {
                peer: "p1:1".to_string()
            }
        );

        let claimed = tracker.claim_reply("r1").expect("claimed");
        assert_eq!(claimed.state, RequestState::Searching);
        // A second claim (e.g. a duplicate refusal) loses.
        assert!(tracker.claim_reply("r1").is_none());

        assert_eq!(tracker.begin_attempt("r1", "p2:1"), Some(2));
        assert_eq!(
            tracker.get("r1").expect("tracked").visited,
            vec!["p1:1", "p2:1"]
        );
    }

    #[test]
    fn test_claim_attempt_only_matches_outstanding_attempt() {
        let tracker = RequestTracker::new();
        tracker.add("r1", "k", Location::Local, Vec::new());

        let first = tracker.begin_attempt("r1", "p1:1").expect("attempt");
        tracker.claim_reply("r1").expect("refused");
        let second = tracker.begin_attempt("r1", "p2:1").expect("attempt");

        // The first attempt's deadline fires late and must not end the second.
        assert!(tracker.claim_attempt("r1", first).is_none());
        assert!(matches!(
            tracker.get("r1").expect("tracked").state,
            RequestState::AwaitingReply { .. }
        ));

        assert!(tracker.claim_attempt("r1", second).is_some());
        assert!(tracker.claim_attempt("r1", second).is_none());
    }

    #[test]
    fn test_resolve_late_upgrades_exhausted_once() {
        let tracker = RequestTracker::new();
        tracker.add("gave-up", "k", Location::Local, Vec::new());
        tracker.resolve("gave-up", Resolution::Exhausted);
        tracker.add("found", "k", Location::Local, Vec::new());
        tracker.resolve(
            "found",
            Resolution::Found {
                holder: "h:1".to_string(),
            },
        );

        let late = tracker.resolve_late("gave-up", "h:2").expect("upgraded");
        assert_eq!(
            late.state,
            RequestState::Resolved(Resolution::Found {
                holder: "h:2".to_string()
            })
        );
        assert!(tracker.resolve_late("gave-up", "h:3").is_none());
        assert!(tracker.resolve_late("found", "h:3").is_none());
        assert!(tracker.resolve_late("unknown", "h:3").is_none());
    }

    #[test]
    fn test_visited_only_grows() {
        let tracker = RequestTracker::new();
        tracker.add("r1", "k", peer("s:1"), vec!["s:1".to_string()]);

        let mut previous = tracker.get("r1").expect("tracked").visited;
        for p in ["a:1", "b:1", "a:1", "c:1"] {
            if tracker.begin_attempt("r1", p).is_some() {
                tracker.claim_reply("r1");
            }
            let current = tracker.get("r1").expect("tracked").visited;
            assert!(current.starts_with(&previous));
            previous = current;
        }
        assert_eq!(previous, vec!["s:1", "a:1", "b:1", "c:1"]);
    }

    #[test]
    fn test_resolve_once() {
        let tracker = RequestTracker::new();
        tracker.add("r1", "k", Location::Local, Vec::new());
        assert!(tracker.begin_attempt("r1", "p:1").is_some());

        let before = tracker
            .resolve(
                "r1",
                Resolution::Found {
                    holder: "h:1".to_string(),
                },
            )
            .expect("first resolution");
        assert!(matches!(before.state, RequestState::AwaitingReply { .. }));
        assert!(tracker.resolve("r1", Resolution::Exhausted).is_none());
        assert!(tracker.resolve("unknown", Resolution::Exhausted).is_none());

        // Resolved requests cannot be driven again.
        assert!(tracker.claim_reply("r1").is_none());
        assert!(tracker.claim_attempt("r1", 1).is_none());
        assert!(tracker.begin_attempt("r1", "q:1").is_none());
    }

    #[test]
    fn test_sweep() {
        let tracker = RequestTracker::new();
        tracker.add("done", "k", Location::Local, Vec::new());
        tracker.resolve("done", Resolution::Exhausted);
        tracker.add("pending", "k", Location::Local, Vec::new());

        let resolved_ttl = Duration::from_secs(60);
        let pending_ttl = Duration::from_secs(600);

        let now = Instant::now();
        assert!(tracker.sweep(now, resolved_ttl, pending_ttl).is_empty());

        let swept = tracker.sweep(now + Duration::from_secs(61), resolved_ttl, pending_ttl);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].0, "done");
        assert!(tracker.get("pending").is_some());

        let swept = tracker.sweep(now + Duration::from_secs(601), resolved_ttl, pending_ttl);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].0, "pending");
        assert!(tracker.is_empty());
    }
}
