//! Caption collection inside a page agent

use crate::error::{Error, Result};
use crate::store::{StateStore, StoreKey};
use crate::types::{CaptionSegment, CaptionSet, VideoContext};
use async_trait::async_trait;
use std::sync::Arc;

/// Where a page agent gets captions from
#[async_trait]
pub trait CaptionSource: Send + Sync {
    /// Fetch the raw segments for a video.
    ///
    /// Returns [`Error::NotFound`] when the video has no captions.
    async fn fetch_captions(&self, video: &VideoContext) -> Result<Vec<CaptionSegment>>;
}

/// Extracts captions and publishes them to the shared store
pub struct CaptionCollector {
    store: StateStore,
    source: Arc<dyn CaptionSource>,
}

impl CaptionCollector {
    pub fn new(store: StateStore, source: Arc<dyn CaptionSource>) -> Self {
        Self { store, source }
    }

    /// Fetch captions for `video` and publish them as `currentSubtitles`.
    ///
    /// Videos without captions are added to the negative cache and never
    /// fetched again.
    pub async fn collect(&self, video: &VideoContext) -> Result<CaptionSet> {
        let video_id = video.video_id.as_str();

        if self.store.is_negatively_cached(video_id)? {
            return Err(Error::NotFound(format!("no captions for {}", video_id)));
        }

        let segments = match self.source.fetch_captions(video).await {
            Ok(segments) if segments.is_empty() => {
                self.store.add_to_negative_cache(video_id)?;
                return Err(Error::NotFound(format!("empty captions for {}", video_id)));
            }
            Ok(segments) => segments,
            Err(e) if e.is_not_found() => {
                self.store.add_to_negative_cache(video_id)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let set = CaptionSet::new(video_id, segments);
        let hash = set.content_hash();
        let short_hash = &hash[..12];

        // Another agent may have published first; the later write wins with
        // equivalent data.
        let replaced = self
            .store
            .captions_for(video_id)?
            .map(|existing| existing.content_hash() != hash);

        self.store.set_value(StoreKey::CurrentSubtitles, &set)?;

        tracing::info!(
            video_id,
            segments = set.len(),
            hash = %short_hash,
            replaced_different = replaced.unwrap_or(false),
            "Published captions"
        );

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        result: fn() -> Result<Vec<CaptionSegment>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CaptionSource for FixedSource {
        async fn fetch_captions(&self, _video: &VideoContext) -> Result<Vec<CaptionSegment>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn two_segments() -> Result<Vec<CaptionSegment>> {
        Ok(vec![
            CaptionSegment {
                start_time: 3.0,
                end_time: 4.0,
                text: "second".to_string(),
                source_id: None,
            },
            CaptionSegment {
                start_time: 1.0,
                end_time: 2.0,
                text: "first".to_string(),
                source_id: None,
            },
        ])
    }

    fn not_found() -> Result<Vec<CaptionSegment>> {
        Err(Error::NotFound("404".to_string()))
    }

    fn video() -> VideoContext {
        VideoContext::new(Platform::YouTube, "abc", "Title")
    }

    #[tokio::test]
    async fn test_collect_publishes_sorted_set() {
        let store = StateStore::open_in_memory().unwrap();
        let source = Arc::new(FixedSource {
            result: two_segments,
            calls: AtomicUsize::new(0),
        });
        let collector = CaptionCollector::new(store.clone(), source);

        let set = collector.collect(&video()).await.unwrap();
        assert_eq!(set.segments[0].text, "first");
        assert_eq!(store.captions_for("abc").unwrap(), Some(set));
    }

    #[tokio::test]
    async fn test_not_found_is_negatively_cached() {
        let store = StateStore::open_in_memory().unwrap();
        let source = Arc::new(FixedSource {
            result: not_found,
            calls: AtomicUsize::new(0),
        });
        let collector = CaptionCollector::new(store.clone(), source.clone());

        assert!(collector.collect(&video()).await.unwrap_err().is_not_found());
        assert!(store.is_negatively_cached("abc").unwrap());

        // Never retried.
        assert!(collector.collect(&video()).await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
