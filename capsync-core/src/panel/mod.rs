//! Panel controller: the chat UI context
//!
//! The panel owns the conversation. It never touches a page directly:
//! captions arrive through the shared store after the acquirer asks page
//! agents for them, and video changes arrive as store notifications.
//!
//! ```text
//!            StateStore notifications
//!                      │
//!        ┌─────────────┴──────────────┐
//!        ▼                            ▼
//!  currentVideoInfo            pendingSubtitleText
//!  VideoChangeHandler          SubtitleQuoted event
//!        │
//!        ▼
//!   ChatSession ◄── ChatSessionMachine (toggle / clear / reconcile)
//!        │
//!        ▼
//!   send_message ──► CaptionAcquirer ──► ChatBackend (streamed)
//! ```
//!
//! Renderers subscribe to [`PanelEvent`]s; nothing here draws anything.

pub mod history;
pub mod session;
pub mod video_watch;

pub use session::{ChatSession, ChatSessionMachine};
pub use video_watch::VideoChangeHandler;

use crate::acquisition::CaptionAcquirer;
use crate::backend::{ChatBackend, ChatRequest, HistoryEntry, SessionBackend, SessionVideos};
use crate::error::Result;
use crate::store::{StateStore, StoreChange, StoreKey};
use crate::types::{ChatMode, Message, VideoContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 256;

/// Something a renderer should show
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    ModeChanged { previous: ChatMode, mode: ChatMode },
    SystemMessage(String),
    VideoChanged(VideoContext),
    /// A piece of a streamed assistant reply
    AssistantChunk(String),
    /// The complete assistant reply
    AssistantMessage(String),
    HistoryCleared,
    NotesExported {
        session_id: String,
        notes: serde_json::Value,
    },
    /// Caption text a page asked to quote into the chat input
    SubtitleQuoted(String),
}

/// Running store-watch loop
struct Watcher {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The panel context
pub struct PanelController {
    store: StateStore,
    acquirer: Arc<CaptionAcquirer>,
    chat: Arc<dyn ChatBackend>,
    session: Arc<Mutex<ChatSession>>,
    machine: ChatSessionMachine,
    videos: VideoChangeHandler,
    events: broadcast::Sender<PanelEvent>,
    watcher: std::sync::Mutex<Option<Watcher>>,
    started: AtomicBool,
}

impl PanelController {
    pub fn new(
        store: StateStore,
        acquirer: Arc<CaptionAcquirer>,
        sessions: Arc<dyn SessionBackend>,
        chat: Arc<dyn ChatBackend>,
    ) -> Self {
        let session = Arc::new(Mutex::new(ChatSession::load(&store)));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            machine: ChatSessionMachine::new(
                store.clone(),
                sessions,
                session.clone(),
                events.clone(),
            ),
            videos: VideoChangeHandler::new(store.clone(), session.clone(), events.clone()),
            store,
            acquirer,
            chat,
            session,
            events,
            watcher: std::sync::Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.events.subscribe()
    }

    /// Reconcile the mode with the backend, then start reacting to store
    /// changes. Calling it again while running does nothing.
    pub async fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::debug!("Panel already started");
            return;
        }

        // Subscribe before reading anything so no change slips through.
        let mut changes = self.store.subscribe();
        self.machine.reconcile_with_backend().await;

        // Record the video already showing so it is not announced as a change.
        match self.store.current_video() {
            Ok(Some(video)) => {
                let mut session = self.session.lock().await;
                if !session.first_video_seen {
                    session.first_video_seen = true;
                    session.last_video_id = Some(video.video_id);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read current video at startup"),
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let panel = Arc::clone(self);

        let task = tokio::spawn(async move {
            tracing::debug!("Panel store watch started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    change = changes.recv() => {
                        let Some(change) = change else { break };
                        panel.handle_store_change(&change).await;
                    }
                }
            }
            tracing::debug!("Panel store watch stopped");
        });

        *self.watcher.lock().unwrap_or_else(|p| p.into_inner()) = Some(Watcher { shutdown, task });
    }

    /// Stop the store-watch loop and wait for it to finish
    pub async fn stop(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(watcher) = watcher {
            let _ = watcher.shutdown.send(true);
            if let Err(e) = watcher.task.await {
                tracing::warn!(error = %e, "Panel store watch ended abnormally");
            }
            self.started.store(false, Ordering::Release);
        }
    }

    /// React to one store notification
    pub async fn handle_store_change(&self, change: &StoreChange) {
        if change.is(StoreKey::CurrentVideoInfo) {
            self.videos.handle(change).await;
        } else if change.is(StoreKey::PendingSubtitleText) {
            self.take_pending_subtitle(change);
        }
    }

    fn take_pending_subtitle(&self, change: &StoreChange) {
        let Some(text) = change.new_as::<String>() else {
            return;
        };
        if text.trim().is_empty() {
            return;
        }
        if let Err(e) = self.store.remove(&[StoreKey::PendingSubtitleText]) {
            tracing::warn!(error = %e, "Failed to clear pending subtitle text");
        }
        let _ = self.events.send(PanelEvent::SubtitleQuoted(text));
    }

    pub async fn mode(&self) -> ChatMode {
        self.machine.mode().await
    }

    pub async fn history(&self) -> Vec<Message> {
        self.session.lock().await.history.clone()
    }

    /// Flip between default and accumulate mode; `None` if a toggle is
    /// already running
    pub async fn toggle_mode(&self) -> Option<ChatMode> {
        self.machine.toggle().await
    }

    pub async fn clear_chat(&self) {
        self.machine.clear_chat().await
    }

    pub async fn session_videos(&self) -> Result<Option<SessionVideos>> {
        self.machine.session_videos().await
    }

    /// Send a user message and stream the reply.
    ///
    /// Returns the assistant reply, or `None` if the exchange failed. Failures
    /// end up in the history as system messages.
    pub async fn send_message(&self, text: &str) -> Option<String> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let (mode, prior) = {
            let mut session = self.session.lock().await;
            let prior: Vec<HistoryEntry> = session
                .history
                .iter()
                .filter(|m| !m.is_system())
                .map(HistoryEntry::from)
                .collect();
            session.history.push(Message::user(text));
            history::persist(&self.store, &session.history);
            (session.mode, prior)
        };

        let video = match self.store.current_video() {
            Ok(video) => video,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read current video");
                None
            }
        };

        if let Some(video) = &video {
            if !self.acquirer.ensure_captions(&video.video_id).await {
                self.push_system("No subtitles could be loaded for this video.".to_string())
                    .await;
            }
        }

        let subtitles = match &video {
            Some(video) => match self.store.captions_for(&video.video_id) {
                Ok(Some(set)) => set.segments,
                Ok(None) => Vec::new(),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read captions");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let request = ChatRequest {
            message: text.to_string(),
            history: prior,
            subtitles,
            video_id: video.as_ref().map(|v| v.video_id.clone()),
            video_title: video.as_ref().map(|v| v.title.clone()),
        };

        tracing::debug!(
            mode = %mode,
            history = request.history.len(),
            segments = request.subtitles.len(),
            "Sending chat message"
        );

        let events = self.events.clone();
        let mut on_chunk = move |chunk: &str| {
            let _ = events.send(PanelEvent::AssistantChunk(chunk.to_string()));
        };

        match self.chat.chat_completion(mode, &request, &mut on_chunk).await {
            Ok(reply) => {
                {
                    let mut session = self.session.lock().await;
                    session.history.push(Message::assistant(reply.clone()));
                    history::persist(&self.store, &session.history);
                }
                let _ = self.events.send(PanelEvent::AssistantMessage(reply.clone()));
                Some(reply)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Chat completion failed");
                self.push_system(e.user_message()).await;
                None
            }
        }
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
