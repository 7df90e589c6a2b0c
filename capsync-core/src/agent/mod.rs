//! Page agent: the logic living inside one video tab
//!
//! A page agent does two things:
//!
//! 1. Watches the page for video changes and publishes the current
//!    [`VideoContext`] ([`navigation`]).
//! 2. Answers `collectSubtitles` requests by fetching captions and writing
//!    them to the shared store ([`collector`]).
//!
//! It reaches the rest of the system only through the store and the
//! coordinator, via the [`AgentEndpoint`] implementation below.

pub mod collector;
pub mod navigation;
pub mod video_info;

pub use collector::{CaptionCollector, CaptionSource};
pub use navigation::{
    HistoryKind, NavigationObserver, NavigationObserverHandle, NavigationSignal, PageSource,
    VideoChangeDetector,
};

use crate::coordinator::AgentEndpoint;
use crate::protocol::{Request, Response};
use crate::store::{StateStore, StoreKey};
use crate::types::VideoContext;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;

use video_info::{detect_platform, video_context_from};

/// The agent for one tab
pub struct PageAgent {
    store: StateStore,
    page: Arc<dyn PageSource>,
    collector: CaptionCollector,
}

impl PageAgent {
    pub fn new(
        store: StateStore,
        page: Arc<dyn PageSource>,
        source: Arc<dyn CaptionSource>,
    ) -> Self {
        Self {
            collector: CaptionCollector::new(store.clone(), source),
            store,
            page,
        }
    }

    /// Build the video context a collect request refers to.
    ///
    /// Uses the live page when it shows that video, otherwise the canonical
    /// URL for the page's platform.
    fn resolve_video(&self, video_id: &str) -> Option<VideoContext> {
        let location = self.page.location();
        if let Some(ctx) = video_context_from(&location, &self.page.title()) {
            if ctx.video_id == video_id {
                return Some(ctx);
            }
        }
        detect_platform(&location).map(|platform| VideoContext::new(platform, video_id, ""))
    }

    /// Serve a `collectSubtitles` request
    pub async fn collect_subtitles(&self, video_id: &str) -> Response {
        let Some(video) = self.resolve_video(video_id) else {
            return Response::failure("not a supported video page");
        };

        match self.collector.collect(&video).await {
            Ok(set) => Response::ok(Some(json!({
                "videoId": set.video_id,
                "segmentCount": set.len(),
            }))),
            Err(e) => {
                if e.is_not_found() {
                    tracing::info!(video_id, "No captions available");
                } else {
                    tracing::warn!(video_id, error = %e, "Caption collection failed");
                }
                Response::from(&e)
            }
        }
    }

    /// Whether captions are fetched as soon as the page changes video.
    /// Enabled unless explicitly turned off.
    pub fn auto_collect_enabled(&self) -> bool {
        match self.store.get_as::<bool>(StoreKey::AutoCollectEnabled) {
            Ok(value) => value.unwrap_or(true),
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable autoCollectEnabled, assuming enabled");
                true
            }
        }
    }

    /// Collect captions for every video this page navigates to, while
    /// auto-collect is enabled.
    pub fn spawn_auto_collect(
        self: Arc<Self>,
        mut changes: broadcast::Receiver<VideoContext>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let ctx = match changes.recv().await {
                    Ok(ctx) => ctx,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Auto-collect skipped stale video changes");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if !self.auto_collect_enabled() {
                    continue;
                }
                if let Err(e) = self.collector.collect(&ctx).await {
                    tracing::debug!(video_id = %ctx.video_id, error = %e, "Auto-collect failed");
                }
            }
        })
    }
}

#[async_trait]
impl AgentEndpoint for PageAgent {
    async fn deliver(&self, request: Request) -> Response {
        match request {
            Request::CollectSubtitles { video_id } => self.collect_subtitles(&video_id).await,
            other => Response::failure(format!("{} is not handled by page agents", other.action())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::types::CaptionSegment;

    struct StaticPage(&'static str, &'static str);

    impl PageSource for StaticPage {
        fn location(&self) -> String {
            self.0.to_string()
        }

        fn title(&self) -> String {
            self.1.to_string()
        }
    }

    struct EchoSource;

    #[async_trait]
    impl CaptionSource for EchoSource {
        async fn fetch_captions(&self, video: &VideoContext) -> Result<Vec<CaptionSegment>> {
            if video.video_id == "missing" {
                return Err(Error::NotFound("404".to_string()));
            }
            Ok(vec![CaptionSegment {
                start_time: 0.0,
                end_time: 1.0,
                text: video.url.clone(),
                source_id: None,
            }])
        }
    }

    fn agent(store: &StateStore, location: &'static str) -> PageAgent {
        PageAgent::new(
            store.clone(),
            Arc::new(StaticPage(location, "Title - YouTube")),
            Arc::new(EchoSource),
        )
    }

    #[tokio::test]
    async fn test_collect_request_publishes_captions() {
        let store = StateStore::open_in_memory().unwrap();
        let agent = agent(&store, "https://www.youtube.com/watch?v=abc");

        let response = agent.deliver(Request::collect("abc")).await;
        assert!(response.success);
        assert_eq!(response.result.unwrap()["segmentCount"], 1);

        let set = store.captions_for("abc").unwrap().unwrap();
        assert_eq!(set.segments[0].text, "https://www.youtube.com/watch?v=abc");
    }

    #[tokio::test]
    async fn test_collect_for_other_video_uses_canonical_url() {
        let store = StateStore::open_in_memory().unwrap();
        let agent = agent(&store, "https://www.youtube.com/watch?v=abc");

        assert!(agent.deliver(Request::collect("xyz")).await.success);
        let set = store.captions_for("xyz").unwrap().unwrap();
        assert_eq!(set.segments[0].text, "https://www.youtube.com/watch?v=xyz");
    }

    #[tokio::test]
    async fn test_missing_captions_fail_and_cache() {
        let store = StateStore::open_in_memory().unwrap();
        let agent = agent(&store, "https://www.youtube.com/watch?v=missing");

        let response = agent.deliver(Request::collect("missing")).await;
        assert!(!response.success);
        assert!(store.is_negatively_cached("missing").unwrap());
    }

    #[tokio::test]
    async fn test_non_video_page_refuses() {
        let store = StateStore::open_in_memory().unwrap();
        let agent = agent(&store, "https://example.com/");
        assert!(!agent.deliver(Request::collect("abc")).await.success);
        assert!(!agent.deliver(Request::CheckIfYouTube).await.success);
    }

    #[tokio::test]
    async fn test_auto_collect_follows_navigation_and_switch() {
        let store = StateStore::open_in_memory().unwrap();
        let agent = Arc::new(agent(&store, "https://www.youtube.com/watch?v=abc"));
        let mut detector = VideoChangeDetector::new(store.clone());
        let task = agent.clone().spawn_auto_collect(detector.subscribe_local());

        let mut sub = store.subscribe();
        detector
            .update_current_video("https://www.youtube.com/watch?v=abc", "Title")
            .unwrap();

        let published = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while let Some(change) = sub.recv().await {
                if change.is(StoreKey::CurrentSubtitles) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(published);

        store
            .set_value(StoreKey::AutoCollectEnabled, &false)
            .unwrap();
        assert!(!agent.auto_collect_enabled());

        drop(detector);
        task.await.unwrap();
    }
}
