//! Caption acquisition
//!
//! The panel cannot read a page directly. To get captions for a video it
//! asks every capable page agent (through the coordinator) and then watches
//! the shared store until a matching [`CaptionSet`](crate::types::CaptionSet)
//! shows up:
//!
//! ```text
//!   ensure_captions(id)
//!     ├─ job already collecting?  ──► await the leader's result
//!     ├─ store has captions?      ──► true
//!     ├─ negative cache hit?      ──► false
//!     └─ broadcast collectSubtitles
//!          ├─ no ack within grace ──► directed per-tab sends
//!          └─ BoundedPoll(store)  ──► true | false (negative cache) | Timeout
//! ```
//!
//! The store is the ground truth; acks only tell us whether to fall back.
//! Jobs are per video id, so a video change leaves the old job running to
//! completion without anyone waiting on it.

pub mod poll;

pub use poll::BoundedPoll;

use crate::config::AcquisitionConfig;
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::protocol::Request;
use crate::store::StateStore;
use crate::types::{CollectionJob, JobStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

struct JobEntry {
    job: CollectionJob,
    done: watch::Receiver<Option<bool>>,
}

/// What `ensure_captions` decided before doing any remote work
enum Start {
    Ready(bool),
    Follow(watch::Receiver<Option<bool>>),
    Lead(watch::Sender<Option<bool>>),
}

/// Makes sure captions for a video are in the store
pub struct CaptionAcquirer {
    store: StateStore,
    coordinator: Arc<Coordinator>,
    poll: BoundedPoll,
    jobs: Mutex<HashMap<String, JobEntry>>,
}

impl CaptionAcquirer {
    pub fn new(
        store: StateStore,
        coordinator: Arc<Coordinator>,
        poll: BoundedPoll,
    ) -> Self {
        Self {
            store,
            coordinator,
            poll,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        store: StateStore,
        coordinator: Arc<Coordinator>,
        config: &AcquisitionConfig,
    ) -> Self {
        Self::new(store, coordinator, BoundedPoll::from_config(config))
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Snapshot of the transient job for `video_id`
    pub fn job(&self, video_id: &str) -> Option<CollectionJob> {
        self.jobs().get(video_id).map(|entry| entry.job.clone())
    }

    /// Ensure the store holds captions for `video_id`.
    ///
    /// Returns `true` once a matching caption set is stored. Never errors:
    /// failures are logged and reported as `false`.
    pub async fn ensure_captions(&self, video_id: &str) -> bool {
        let start = match self.start(video_id) {
            Ok(start) => start,
            Err(e) => {
                tracing::warn!(video_id, error = %e, "Caption check failed");
                return false;
            }
        };

        match start {
            Start::Ready(found) => found,
            Start::Follow(mut done) => {
                tracing::debug!(video_id, "Joining in-flight caption acquisition");
                match done.wait_for(|result| result.is_some()).await {
                    Ok(result) => (*result).unwrap_or(false),
                    Err(_) => false,
                }
            }
            Start::Lead(done) => {
                let mut guard = LeaderGuard {
                    acquirer: self,
                    video_id,
                    done,
                    finished: false,
                };
                let found = match self.acquire(video_id).await {
                    Ok(found) => found,
                    Err(e) => {
                        tracing::warn!(video_id, error = %e, "Caption acquisition failed");
                        false
                    }
                };
                guard.finish(found);
                found
            }
        }
    }

    /// Decide, under the job lock, whether to answer now, follow, or lead.
    fn start(&self, video_id: &str) -> Result<Start> {
        let mut jobs = self.jobs();

        if let Some(entry) = jobs.get(video_id) {
            if entry.job.status == JobStatus::Collecting {
                return Ok(Start::Follow(entry.done.clone()));
            }
        }

        if self.store.captions_for(video_id)?.is_some() {
            return Ok(Start::Ready(true));
        }

        if self.store.is_negatively_cached(video_id)? {
            tracing::debug!(video_id, "Negative cache hit, skipping acquisition");
            return Ok(Start::Ready(false));
        }

        let (tx, rx) = watch::channel(None);
        jobs.insert(
            video_id.to_string(),
            JobEntry {
                job: CollectionJob::start(video_id),
                done: rx,
            },
        );
        Ok(Start::Lead(tx))
    }

    async fn acquire(&self, video_id: &str) -> Result<bool> {
        let pattern = self.coordinator.pattern_for_video(video_id);
        let outcome = self
            .coordinator
            .broadcast(Request::collect(video_id), &pattern)
            .await;

        if outcome.targets.is_empty() {
            tracing::debug!(video_id, pattern = %pattern, "No video tab open");
            return Ok(false);
        }

        if !outcome.acknowledged() {
            tracing::debug!(
                video_id,
                tabs = outcome.targets.len(),
                "No ack within grace window, sending directly"
            );
            let grace = self.coordinator.ack_grace();
            for tab_id in &outcome.targets {
                let send = self
                    .coordinator
                    .send_to_tab(*tab_id, Request::collect(video_id));
                match tokio::time::timeout(grace, send).await {
                    Ok(response) if response.is_success() => break,
                    Ok(_) => {}
                    Err(_) => {
                        tracing::debug!(video_id, tab_id, "Directed send unanswered, moving on");
                    }
                }
            }
        }

        let result = self
            .poll
            .run(|attempt| {
                self.record_attempt(video_id, attempt);
                std::future::ready(self.probe_store(video_id))
            })
            .await;

        match result {
            Err(Error::Timeout { attempts }) => {
                tracing::warn!(video_id, attempts, "Timed out waiting for captions");
                Ok(false)
            }
            other => other,
        }
    }

    /// `Some(true)` once captions are stored, `Some(false)` once an agent
    /// has recorded that none exist.
    fn probe_store(&self, video_id: &str) -> Result<Option<bool>> {
        if self.store.captions_for(video_id)?.is_some() {
            return Ok(Some(true));
        }
        if self.store.is_negatively_cached(video_id)? {
            return Ok(Some(false));
        }
        Ok(None)
    }

    fn record_attempt(&self, video_id: &str, attempt: u32) {
        if let Some(entry) = self.jobs().get_mut(video_id) {
            entry.job.attempts = attempt;
        }
    }

    fn settle(&self, video_id: &str, found: bool) {
        let mut jobs = self.jobs();
        if found {
            if let Some(entry) = jobs.get_mut(video_id) {
                entry.job.status = JobStatus::Collected;
            }
            tracing::info!(video_id, "Captions acquired");
        } else {
            // Failed jobs are discarded so a later call starts over.
            jobs.remove(video_id);
        }
    }
}

/// Releases followers even if the leading future is dropped mid-flight.
struct LeaderGuard<'a> {
    acquirer: &'a CaptionAcquirer,
    video_id: &'a str,
    done: watch::Sender<Option<bool>>,
    finished: bool,
}

impl LeaderGuard<'_> {
    fn finish(&mut self, found: bool) {
        self.acquirer.settle(self.video_id, found);
        let _ = self.done.send(Some(found));
        self.finished = true;
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::AgentEndpoint;
    use crate::protocol::Response;
    use crate::store::StoreKey;
    use crate::types::{CaptionSegment, CaptionSet};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Publishes captions for any requested id after a short delay
    struct PublishingAgent {
        store: StateStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AgentEndpoint for PublishingAgent {
        async fn deliver(&self, request: Request) -> Response {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let Request::CollectSubtitles { video_id } = request else {
                return Response::failure("unsupported");
            };
            tokio::time::sleep(Duration::from_millis(20)).await;
            let set = CaptionSet::new(
                video_id,
                vec![CaptionSegment {
                    start_time: 0.0,
                    end_time: 1.0,
                    text: "hi".to_string(),
                    source_id: None,
                }],
            );
            self.store
                .set_value(StoreKey::CurrentSubtitles, &set)
                .unwrap();
            Response::ok(None)
        }
    }

    fn setup(store: &StateStore) -> (CaptionAcquirer, Arc<PublishingAgent>) {
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            "youtube.com",
            Duration::from_millis(500),
        ));
        let agent = Arc::new(PublishingAgent {
            store: store.clone(),
            calls: AtomicUsize::new(0),
        });
        coordinator.register_tab(1, "https://www.youtube.com/watch?v=abc", agent.clone());
        let acquirer = CaptionAcquirer::new(
            store.clone(),
            coordinator,
            BoundedPoll::new(Duration::from_millis(10), 20),
        );
        (acquirer, agent)
    }

    #[tokio::test]
    async fn test_acquires_and_marks_collected() {
        let store = StateStore::open_in_memory().unwrap();
        let (acquirer, agent) = setup(&store);

        assert!(acquirer.ensure_captions("abc").await);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
        assert_eq!(acquirer.job("abc").unwrap().status, JobStatus::Collected);

        // Already stored: no further broadcast.
        assert!(acquirer.ensure_captions("abc").await);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_broadcast() {
        let store = StateStore::open_in_memory().unwrap();
        let (acquirer, agent) = setup(&store);

        let (a, b, c) = tokio::join!(
            acquirer.ensure_captions("abc"),
            acquirer.ensure_captions("abc"),
            acquirer.ensure_captions("abc"),
        );
        assert!(a && b && c);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_negative_cache_short_circuits() {
        let store = StateStore::open_in_memory().unwrap();
        let (acquirer, agent) = setup(&store);
        store.add_to_negative_cache("abc").unwrap();

        assert!(!acquirer.ensure_captions("abc").await);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 0);
        assert!(acquirer.job("abc").is_none());
    }

    #[tokio::test]
    async fn test_no_matching_tab_is_false() {
        let store = StateStore::open_in_memory().unwrap();
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            "youtube.com",
            Duration::from_millis(50),
        ));
        let acquirer = CaptionAcquirer::new(
            store,
            coordinator,
            BoundedPoll::new(Duration::from_millis(1), 3),
        );
        assert!(!acquirer.ensure_captions("abc").await);
        assert!(acquirer.job("abc").is_none());
    }

    /// Never answers
    struct HungAgent;

    #[async_trait]
    impl AgentEndpoint for HungAgent {
        async fn deliver(&self, _request: Request) -> Response {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_hung_agent_cannot_stall_acquisition() {
        let store = StateStore::open_in_memory().unwrap();
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            "youtube.com",
            Duration::from_millis(20),
        ));
        coordinator.register_tab(1, "https://www.youtube.com/watch?v=aaa", Arc::new(HungAgent));
        let acquirer = CaptionAcquirer::new(
            store,
            coordinator,
            BoundedPoll::new(Duration::from_millis(10), 5),
        );

        let (leader, follower) = tokio::time::timeout(Duration::from_secs(3), async {
            tokio::join!(
                acquirer.ensure_captions("aaa"),
                acquirer.ensure_captions("aaa")
            )
        })
        .await
        .expect("acquisition must end within its poll bound");
        assert!(!leader && !follower);
        assert!(acquirer.job("aaa").is_none());
    }
}
