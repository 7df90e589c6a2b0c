//! Panel reaction to video changes published by page agents

use super::history::{self, retain_system_only};
use super::session::ChatSession;
use super::PanelEvent;
use crate::store::{StateStore, StoreChange, StoreKey};
use crate::types::{ChatMode, Message, VideoContext};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Turns `currentVideoInfo` store changes into chat notices
pub struct VideoChangeHandler {
    store: StateStore,
    session: Arc<Mutex<ChatSession>>,
    events: broadcast::Sender<PanelEvent>,
}

impl VideoChangeHandler {
    pub fn new(
        store: StateStore,
        session: Arc<Mutex<ChatSession>>,
        events: broadcast::Sender<PanelEvent>,
    ) -> Self {
        Self {
            store,
            session,
            events,
        }
    }

    /// React to a store change. Returns `true` if a video change was announced.
    ///
    /// The first video of a panel lifetime is recorded silently. Later
    /// changes append a system notice; in default mode the conversation is
    /// dropped first.
    pub async fn handle(&self, change: &StoreChange) -> bool {
        if !change.is(StoreKey::CurrentVideoInfo) {
            return false;
        }
        let Some(notified) = change.new_as::<VideoContext>() else {
            return false;
        };

        // The notification may already be stale; the store decides.
        let video = match self.store.current_video() {
            Ok(Some(current)) => current,
            Ok(None) => notified,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to re-read current video");
                notified
            }
        };
        if video.video_id.is_empty() {
            return false;
        }

        let notice = {
            let mut session = self.session.lock().await;
            if session.last_video_id.as_deref() == Some(video.video_id.as_str()) {
                return false;
            }

            session.last_video_id = Some(video.video_id.clone());
            if !session.first_video_seen {
                session.first_video_seen = true;
                tracing::debug!(video_id = %video.video_id, "First video recorded");
                return false;
            }

            if session.mode == ChatMode::Default {
                retain_system_only(&mut session.history);
            }
            let notice = format!("Switched to new video: {}", video.display_name());
            session.history.push(Message::system(notice.clone()));
            history::persist(&self.store, &session.history);
            notice
        };

        tracing::info!(video_id = %video.video_id, "Video changed");
        let _ = self.events.send(PanelEvent::VideoChanged(video));
        let _ = self.events.send(PanelEvent::SystemMessage(notice));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;

    fn setup(mode: ChatMode) -> (VideoChangeHandler, StateStore, Arc<Mutex<ChatSession>>) {
        let store = StateStore::open_in_memory().unwrap();
        let session = Arc::new(Mutex::new(ChatSession {
            mode,
            ..Default::default()
        }));
        let (events, _) = broadcast::channel(16);
        let handler = VideoChangeHandler::new(store.clone(), session.clone(), events);
        (handler, store, session)
    }

    fn publish(store: &StateStore, id: &str, title: &str) -> StoreChange {
        let mut sub = store.subscribe();
        store
            .set_value(
                StoreKey::CurrentVideoInfo,
                &VideoContext::new(Platform::YouTube, id, title),
            )
            .unwrap();
        sub.try_recv().unwrap()
    }

    #[tokio::test]
    async fn test_first_load_is_silent() {
        let (handler, store, session) = setup(ChatMode::Default);
        assert!(!handler.handle(&publish(&store, "a", "A")).await);
        assert!(session.lock().await.history.is_empty());

        assert!(handler.handle(&publish(&store, "b", "B")).await);
        let history = session.lock().await.history.clone();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Switched to new video: B");
    }

    #[tokio::test]
    async fn test_same_id_is_ignored() {
        let (handler, store, _session) = setup(ChatMode::Default);
        handler.handle(&publish(&store, "a", "")).await;
        assert!(!handler.handle(&publish(&store, "a", "Title arrives late")).await);
    }

    #[tokio::test]
    async fn test_default_mode_drops_conversation() {
        let (handler, store, session) = setup(ChatMode::Default);
        handler.handle(&publish(&store, "a", "A")).await;
        session.lock().await.history = vec![Message::user("q"), Message::assistant("a")];

        handler.handle(&publish(&store, "b", "")).await;
        let history = session.lock().await.history.clone();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Switched to new video: b");
    }

    #[tokio::test]
    async fn test_accumulate_mode_keeps_conversation() {
        let (handler, store, session) = setup(ChatMode::Accumulate);
        handler.handle(&publish(&store, "a", "A")).await;
        session.lock().await.history = vec![Message::user("q"), Message::assistant("a")];

        handler.handle(&publish(&store, "b", "B")).await;
        assert_eq!(session.lock().await.history.len(), 3);
    }

    #[tokio::test]
    async fn test_uses_latest_store_value_over_stale_notification() {
        let (handler, store, session) = setup(ChatMode::Default);
        handler.handle(&publish(&store, "a", "A")).await;

        let stale = publish(&store, "b", "B");
        publish(&store, "c", "C");
        assert!(handler.handle(&stale).await);
        assert_eq!(session.lock().await.last_video_id.as_deref(), Some("c"));
    }
}
