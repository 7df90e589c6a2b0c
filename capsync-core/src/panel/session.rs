//! Chat session state machine
//!
//! ```text
//!                 toggle: clear-session
//!   ┌─────────┐ ─────────────────────────► ┌────────────┐
//!   │ Default │                            │ Accumulate │
//!   └─────────┘ ◄───────────────────────── └────────────┘
//!          toggle: end-session (+ export if there was a conversation)
//! ```
//!
//! Every toggle clears the local history. The mode flip and the local
//! clear happen before any remote call and are not rolled back if the
//! remote call fails; the failure is surfaced as a system message and the
//! next startup reconciliation brings the mode back in line with the
//! backend.

use super::history::{self, has_conversation};
use super::PanelEvent;
use crate::backend::{SessionBackend, SessionVideos};
use crate::error::Result;
use crate::store::{StateStore, StoreKey};
use crate::types::{ChatMode, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Panel-local session state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSession {
    pub mode: ChatMode,
    pub history: Vec<Message>,
    /// Video the panel last announced; `None` after a session ends
    pub last_video_id: Option<String>,
    /// Whether the first video of this panel lifetime has been seen
    pub first_video_seen: bool,
}

impl ChatSession {
    /// Restore mode and history persisted by an earlier panel
    pub fn load(store: &StateStore) -> Self {
        let mode = store.chat_mode().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Unreadable chat mode, using default");
            ChatMode::Default
        });
        let history = store.chat_history().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Unreadable chat history, starting empty");
            Vec::new()
        });
        Self {
            mode,
            history,
            ..Default::default()
        }
    }

    /// Treat the next video as a first load
    pub fn forget_video(&mut self) {
        self.last_video_id = None;
        self.first_video_seen = false;
    }
}

/// Clears the in-flight flag when a toggle finishes or is dropped
struct ToggleGuard<'a>(&'a AtomicBool);

impl Drop for ToggleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns mode transitions and their remote side effects
pub struct ChatSessionMachine {
    store: StateStore,
    backend: Arc<dyn SessionBackend>,
    session: Arc<Mutex<ChatSession>>,
    events: broadcast::Sender<PanelEvent>,
    toggling: AtomicBool,
}

impl ChatSessionMachine {
    pub fn new(
        store: StateStore,
        backend: Arc<dyn SessionBackend>,
        session: Arc<Mutex<ChatSession>>,
        events: broadcast::Sender<PanelEvent>,
    ) -> Self {
        Self {
            store,
            backend,
            session,
            events,
            toggling: AtomicBool::new(false),
        }
    }

    pub async fn mode(&self) -> ChatMode {
        self.session.lock().await.mode
    }

    pub fn is_toggling(&self) -> bool {
        self.toggling.load(Ordering::Acquire)
    }

    /// Flip the chat mode.
    ///
    /// Returns the new mode, or `None` if another toggle is in flight.
    pub async fn toggle(&self) -> Option<ChatMode> {
        if self
            .toggling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Toggle already in flight, ignoring");
            return None;
        }
        let _guard = ToggleGuard(&self.toggling);

        let (previous, mode, had_conversation) = {
            let mut session = self.session.lock().await;
            let previous = session.mode;
            session.mode = previous.flipped();
            let had_conversation = has_conversation(&session.history);
            session.history.clear();
            (previous, session.mode, had_conversation)
        };

        if let Err(e) = self.store.set_value(StoreKey::ChatMode, &mode) {
            tracing::warn!(error = %e, mode = %mode, "Failed to persist chat mode");
        }
        history::persist(&self.store, &[]);

        tracing::info!(from = %previous, to = %mode, had_conversation, "Chat mode toggled");

        match previous {
            ChatMode::Accumulate => {
                self.end_remote_session(had_conversation).await;
                self.session.lock().await.forget_video();
            }
            ChatMode::Default => {
                if let Err(e) = self.backend.clear_session().await {
                    tracing::warn!(error = %e, "Failed to clear remote session");
                    let notice = format!("Could not reset the chat session. {}", e.user_message());
                    self.push_system(notice).await;
                }
            }
        }

        self.push_system(mode_notice(mode)).await;
        let _ = self.events.send(PanelEvent::ModeChanged { previous, mode });
        Some(mode)
    }

    async fn end_remote_session(&self, export: bool) {
        let ended = match self.backend.end_session().await {
            Ok(ended) => ended,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to end remote session");
                let notice = format!("Could not end the chat session. {}", e.user_message());
                self.push_system(notice).await;
                return;
            }
        };

        if !export {
            return;
        }

        let Some(session_id) = ended.session_id else {
            tracing::warn!("Ended session has no id, skipping notes export");
            return;
        };

        match self.backend.export_notes(&session_id).await {
            Ok(notes) => {
                tracing::info!(session_id = %session_id, "Exported session notes");
                let _ = self.events.send(PanelEvent::NotesExported { session_id, notes });
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to export notes");
                let notice = format!("Could not export notes. {}", e.user_message());
                self.push_system(notice).await;
            }
        }
    }

    /// Adopt accumulate mode if the backend still has an active session.
    ///
    /// No remote side effects and no history changes. Returns whether the
    /// mode changed.
    pub async fn reconcile_with_backend(&self) -> bool {
        let status = match self.backend.session_status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(error = %e, "Session status check failed");
                return false;
            }
        };

        if !status.has_active_session {
            return false;
        }

        let previous = {
            let mut session = self.session.lock().await;
            if session.mode == ChatMode::Accumulate {
                return false;
            }
            let previous = session.mode;
            session.mode = ChatMode::Accumulate;
            previous
        };

        if let Err(e) = self.store.set_value(StoreKey::ChatMode, &ChatMode::Accumulate) {
            tracing::warn!(error = %e, "Failed to persist adopted chat mode");
        }
        tracing::info!(videos = status.video_count, "Adopted active remote session");
        let _ = self.events.send(PanelEvent::ModeChanged {
            previous,
            mode: ChatMode::Accumulate,
        });
        true
    }

    /// Delete the remote session and start the conversation over
    pub async fn clear_chat(&self) {
        if let Err(e) = self.backend.clear_session().await {
            tracing::warn!(error = %e, "Failed to delete remote session");
        }

        {
            let mut session = self.session.lock().await;
            session.history.clear();
            session.history.push(Message::system("Chat cleared."));
            session.forget_video();
            history::persist(&self.store, &session.history);
        }

        let _ = self.events.send(PanelEvent::HistoryCleared);
    }

    /// Videos attached to the accumulated session; `None` in default mode
    pub async fn session_videos(&self) -> Result<Option<SessionVideos>> {
        if self.mode().await != ChatMode::Accumulate {
            return Ok(None);
        }
        let current = self.store.current_video()?;
        let videos = self
            .backend
            .session_videos(current.as_ref().map(|v| v.video_id.as_str()))
            .await?;
        Ok(Some(videos))
    }

    async fn push_system(&self, text: String) {
        {
            let mut session = self.session.lock().await;
            session.history.push(Message::system(text.clone()));
            history::persist(&self.store, &session.history);
        }
        let _ = self.events.send(PanelEvent::SystemMessage(text));
    }
}

fn mode_notice(mode: ChatMode) -> String {
    match mode {
        ChatMode::Accumulate => {
            "Accumulate mode on: the conversation continues across videos.".to_string()
        }
        ChatMode::Default => "Default mode on: each video starts a fresh conversation.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EndedSession, SessionStatus};
    use crate::error::Error;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingBackend {
        active: bool,
        fail_end: bool,
        delay_ms: u64,
        status: AtomicUsize,
        ended: AtomicUsize,
        exported: AtomicUsize,
        cleared: AtomicUsize,
    }

    #[async_trait]
    impl SessionBackend for CountingBackend {
        async fn session_status(&self) -> Result<SessionStatus> {
            self.status.fetch_add(1, Ordering::SeqCst);
            Ok(SessionStatus {
                has_active_session: self.active,
                ..Default::default()
            })
        }

        async fn end_session(&self) -> Result<EndedSession> {
            self.ended.fetch_add(1, Ordering::SeqCst);
            if self.fail_end {
                return Err(Error::Network("502".to_string()));
            }
            Ok(EndedSession {
                session_id: Some("7".to_string()),
                ..Default::default()
            })
        }

        async fn export_notes(&self, _session_id: &str) -> Result<serde_json::Value> {
            self.exported.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"status": "success"}))
        }

        async fn clear_session(&self) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.cleared.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn session_videos(&self, _current: Option<&str>) -> Result<SessionVideos> {
            Ok(SessionVideos::default())
        }
    }

    fn build_machine(
        backend: Arc<CountingBackend>,
        session: ChatSession,
    ) -> (ChatSessionMachine, StateStore, broadcast::Receiver<PanelEvent>) {
        let store = StateStore::open_in_memory().unwrap();
        let (events, rx) = broadcast::channel(64);
        let machine =
            ChatSessionMachine::new(store.clone(), backend, Arc::new(Mutex::new(session)), events);
        (machine, store, rx)
    }

    #[tokio::test]
    async fn test_toggle_failure_keeps_flip_and_reports() {
        let backend = Arc::new(CountingBackend {
            fail_end: true,
            ..Default::default()
        });
        let session = ChatSession {
            mode: ChatMode::Accumulate,
            history: vec![Message::user("q")],
            ..Default::default()
        };
        let (machine, store, _rx) = build_machine(backend.clone(), session);

        assert_eq!(machine.toggle().await, Some(ChatMode::Default));
        assert_eq!(store.chat_mode().unwrap(), ChatMode::Default);
        assert_eq!(backend.exported.load(Ordering::SeqCst), 0);

        let history = machine.session.lock().await.history.clone();
        assert!(!has_conversation(&history));
        assert!(history
            .iter()
            .any(|m| m.content.starts_with("Could not end the chat session")));
    }

    #[tokio::test]
    async fn test_reentrant_toggle_is_ignored() {
        let backend = Arc::new(CountingBackend {
            delay_ms: 50,
            ..Default::default()
        });
        let (machine, _store, _rx) = build_machine(backend.clone(), ChatSession::default());

        let (first, second) = tokio::join!(machine.toggle(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            machine.toggle().await
        });
        assert_eq!(first, Some(ChatMode::Accumulate));
        assert_eq!(second, None);
        assert_eq!(backend.cleared.load(Ordering::SeqCst), 1);
        assert!(!machine.is_toggling());
    }

    #[tokio::test]
    async fn test_reconcile_adopts_accumulate_without_side_effects() {
        let backend = Arc::new(CountingBackend {
            active: true,
            ..Default::default()
        });
        let session = ChatSession {
            history: vec![Message::user("keep me")],
            ..Default::default()
        };
        let (machine, store, mut rx) = build_machine(backend.clone(), session);

        assert!(machine.reconcile_with_backend().await);
        assert_eq!(machine.mode().await, ChatMode::Accumulate);
        assert_eq!(store.chat_mode().unwrap(), ChatMode::Accumulate);
        assert_eq!(machine.session.lock().await.history.len(), 1);
        assert_eq!(backend.cleared.load(Ordering::SeqCst), 0);
        assert_eq!(backend.ended.load(Ordering::SeqCst), 0);
        assert!(matches!(
            rx.try_recv().unwrap(),
            PanelEvent::ModeChanged {
                mode: ChatMode::Accumulate,
                ..
            }
        ));

        // Already accumulating: nothing to do.
        assert!(!machine.reconcile_with_backend().await);
    }

    #[tokio::test]
    async fn test_clear_chat_resets_history_and_last_video() {
        let backend = Arc::new(CountingBackend::default());
        let session = ChatSession {
            history: vec![Message::user("q"), Message::assistant("a")],
            last_video_id: Some("abc".to_string()),
            first_video_seen: true,
            ..Default::default()
        };
        let (machine, store, _rx) = build_machine(backend.clone(), session);

        machine.clear_chat().await;

        let session = machine.session.lock().await.clone();
        assert_eq!(session.history.len(), 1);
        assert!(session.history[0].is_system());
        assert_eq!(session.last_video_id, None);
        assert!(!session.first_video_seen);
        assert_eq!(backend.cleared.load(Ordering::SeqCst), 1);
        assert_eq!(store.chat_history().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_videos_only_in_accumulate() {
        let backend = Arc::new(CountingBackend::default());
        let (machine, _store, _rx) = build_machine(backend, ChatSession::default());
        assert!(machine.session_videos().await.unwrap().is_none());

        machine.session.lock().await.mode = ChatMode::Accumulate;
        assert!(machine.session_videos().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_leaving_accumulate_restarts_first_load() {
        use super::super::video_watch::VideoChangeHandler;
        use crate::types::{Platform, VideoContext};

        let backend = Arc::new(CountingBackend::default());
        let session = ChatSession {
            mode: ChatMode::Accumulate,
            last_video_id: Some("a".to_string()),
            first_video_seen: true,
            ..Default::default()
        };
        let (machine, store, _rx) = build_machine(backend, session);
        let handler =
            VideoChangeHandler::new(store.clone(), machine.session.clone(), machine.events.clone());

        assert_eq!(machine.toggle().await, Some(ChatMode::Default));

        let mut sub = store.subscribe();
        store
            .set_value(
                StoreKey::CurrentVideoInfo,
                &VideoContext::new(Platform::YouTube, "a", "A (edited)"),
            )
            .unwrap();
        let change = sub.try_recv().unwrap();

        assert!(!handler.handle(&change).await);
        let history = machine.session.lock().await.history.clone();
        assert!(!history
            .iter()
            .any(|m| m.content.starts_with("Switched to new video")));
    }
}
