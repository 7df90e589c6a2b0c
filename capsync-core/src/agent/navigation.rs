//! Video-change detection inside a page
//!
//! Single-page video sites change videos without a page load, so three
//! independent observers watch for it and all funnel into one decision
//! function:
//!
//! ```text
//!   title mutation ─────┐
//!   history push/pop ───┼──► NavigationSignal ──► VideoChangeDetector::update_current_video
//!   location poll tick ─┘                               │
//!                                          ┌────────────┴────────────┐
//!                                          ▼                         ▼
//!                               store: currentVideoInfo    local broadcast (same page)
//! ```
//!
//! The detector short-circuits when neither the id nor the title changed, so
//! the redundant observers cost one string comparison each.

use crate::error::Result;
use crate::store::{StateStore, StoreKey};
use crate::types::VideoContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

use super::video_info::video_context_from;

/// Read access to the page the agent lives in
pub trait PageSource: Send + Sync {
    /// Current location URL
    fn location(&self) -> String;
    /// Current document title, undecorated or not
    fn title(&self) -> String;
}

/// Which history operation was intercepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    PushState,
    ReplaceState,
    PopState,
}

/// A hint that the page may now show a different video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationSignal {
    TitleMutation,
    HistoryNavigation(HistoryKind),
    LocationPoll,
}

/// Decides whether the page moved to a new video and publishes it.
pub struct VideoChangeDetector {
    store: StateStore,
    last_observed: Option<(String, String)>,
    local_tx: broadcast::Sender<VideoContext>,
}

impl VideoChangeDetector {
    pub fn new(store: StateStore) -> Self {
        let (local_tx, _) = broadcast::channel(16);
        Self {
            store,
            last_observed: None,
            local_tx,
        }
    }

    /// Listen for video changes within this page
    pub fn subscribe_local(&self) -> broadcast::Receiver<VideoContext> {
        self.local_tx.subscribe()
    }

    /// Last `(video_id, title)` pair this detector published
    pub fn last_observed(&self) -> Option<(&str, &str)> {
        self.last_observed
            .as_ref()
            .map(|(id, title)| (id.as_str(), title.as_str()))
    }

    /// Re-read the page and publish a new [`VideoContext`] if it changed.
    ///
    /// Returns the published context, or `None` when the page is not a video
    /// page or nothing changed.
    pub fn update_current_video(
        &mut self,
        location: &str,
        raw_title: &str,
    ) -> Result<Option<VideoContext>> {
        let Some(ctx) = video_context_from(location, raw_title) else {
            return Ok(None);
        };

        if let Some((id, title)) = &self.last_observed {
            if *id == ctx.video_id && *title == ctx.title {
                return Ok(None);
            }
        }

        self.store.set_value(StoreKey::CurrentVideoInfo, &ctx)?;
        self.last_observed = Some((ctx.video_id.clone(), ctx.title.clone()));

        tracing::debug!(
            video_id = %ctx.video_id,
            title = %ctx.title,
            platform = ctx.platform.as_str(),
            "Video context updated"
        );

        // Same-page listeners are optional.
        let _ = self.local_tx.send(ctx.clone());
        Ok(Some(ctx))
    }

    /// Read the page through `page` and update
    pub fn observe(&mut self, page: &dyn PageSource) -> Result<Option<VideoContext>> {
        self.update_current_video(&page.location(), &page.title())
    }
}

/// Handle to a running [`NavigationObserver`]
pub struct NavigationObserverHandle {
    signals: mpsc::Sender<NavigationSignal>,
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl NavigationObserverHandle {
    /// Sender for DOM hooks (title observer, history interception)
    pub fn signals(&self) -> mpsc::Sender<NavigationSignal> {
        self.signals.clone()
    }

    pub async fn signal(&self, signal: NavigationSignal) {
        if self.signals.send(signal).await.is_err() {
            tracing::debug!(?signal, "Navigation observer already stopped");
        }
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

/// Runs the three observers against one [`VideoChangeDetector`]
pub struct NavigationObserver {
    page: Arc<dyn PageSource>,
    detector: VideoChangeDetector,
    poll_interval: Duration,
}

impl NavigationObserver {
    pub fn new(
        page: Arc<dyn PageSource>,
        detector: VideoChangeDetector,
        poll_interval: Duration,
    ) -> Self {
        Self {
            page,
            detector,
            poll_interval,
        }
    }

    /// Start observing. The page is read once immediately.
    pub fn spawn(self) -> NavigationObserverHandle {
        let (signals, signal_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(signal_rx, shutdown_rx));
        NavigationObserverHandle {
            signals,
            shutdown_tx,
            task,
        }
    }

    async fn run(
        mut self,
        mut signal_rx: mpsc::Receiver<NavigationSignal>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut signals_open = true;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    break;
                }
                signal = signal_rx.recv(), if signals_open => {
                    match signal {
                        Some(signal) => self.handle(signal),
                        None => signals_open = false,
                    }
                }
                _ = ticker.tick() => {
                    self.handle(NavigationSignal::LocationPoll);
                }
            }
        }

        tracing::debug!("Navigation observer stopped");
    }

    fn handle(&mut self, signal: NavigationSignal) {
        if let Err(e) = self.detector.observe(self.page.as_ref()) {
            tracing::warn!(?signal, error = %e, "Failed to publish video context");
        }
    }
}
