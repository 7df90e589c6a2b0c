//! Coordinator: tab registry and message routing
//!
//! The coordinator is the single long-lived privileged context. It knows
//! which tabs are open and where they point, and it is the only component
//! that can reach a page agent.
//!
//! ```text
//!   Panel ──request──► Coordinator ──deliver──► PageAgent (tab 1)
//!                           │       ──deliver──► PageAgent (tab 2)
//!                           ▼
//!                    first positive ack
//! ```
//!
//! Nothing that crosses this boundary is an error: failures come back as a
//! [`Response`] with `success: false`.

use crate::agent::video_info::{detect_platform, platform_for_video_id};
use crate::error::Result;
use crate::protocol::{parse_request, Request, Response};
use crate::store::{StateStore, StoreKey};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Browser-assigned tab identifier
pub type TabId = u64;

/// Something that can receive a routed [`Request`]: a page agent in a tab.
#[async_trait]
pub trait AgentEndpoint: Send + Sync {
    async fn deliver(&self, request: Request) -> Response;
}

#[derive(Clone)]
struct TabEntry {
    url: String,
    endpoint: Arc<dyn AgentEndpoint>,
}

#[derive(Default)]
struct Registry {
    tabs: BTreeMap<TabId, TabEntry>,
    active: Option<TabId>,
}

/// Result of a [`Coordinator::broadcast`]
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastOutcome {
    /// Tabs the request was sent to
    pub targets: Vec<TabId>,
    /// First tab to answer with `success: true`, and its answer
    pub first_ack: Option<(TabId, Response)>,
}

impl BroadcastOutcome {
    pub fn acknowledged(&self) -> bool {
        self.first_ack.is_some()
    }
}

/// Routes messages between the panel and page agents
pub struct Coordinator {
    store: StateStore,
    registry: Mutex<Registry>,
    site_pattern: String,
    ack_grace: Duration,
}

impl Coordinator {
    pub fn new(store: StateStore, site_pattern: impl Into<String>, ack_grace: Duration) -> Self {
        Self {
            store,
            registry: Mutex::new(Registry::default()),
            site_pattern: site_pattern.into(),
            ack_grace,
        }
    }

    /// Build from the `[acquisition]` config section
    pub fn from_config(store: StateStore, config: &crate::config::AcquisitionConfig) -> Self {
        Self::new(store, config.site_pattern.clone(), config.ack_grace())
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Registry updates are single assignments; a poisoned guard is still consistent.
        self.registry.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn site_pattern(&self) -> &str {
        &self.site_pattern
    }

    pub fn ack_grace(&self) -> Duration {
        self.ack_grace
    }

    /// Tab URL pattern for the site hosting `video_id`.
    ///
    /// Prefers the platform of the current video, then the id's shape, then
    /// the configured pattern.
    pub fn pattern_for_video(&self, video_id: &str) -> String {
        let current = self.store.current_video().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read current video");
            None
        });
        let platform = current
            .filter(|video| video.video_id == video_id)
            .map(|video| video.platform)
            .or_else(|| platform_for_video_id(video_id));
        match platform {
            Some(platform) => platform.host().to_string(),
            None => self.site_pattern.clone(),
        }
    }

    // ============================================
    // Tab registry
    // ============================================

    pub fn register_tab(
        &self,
        tab_id: TabId,
        url: impl Into<String>,
        endpoint: Arc<dyn AgentEndpoint>,
    ) {
        let url = url.into();
        tracing::debug!(tab_id, url = %url, "Tab registered");
        self.registry()
            .tabs
            .insert(tab_id, TabEntry { url, endpoint });
    }

    /// Record a tab navigation. Returns `false` for unknown tabs.
    pub fn update_tab_url(&self, tab_id: TabId, url: impl Into<String>) -> bool {
        match self.registry().tabs.get_mut(&tab_id) {
            Some(entry) => {
                entry.url = url.into();
                true
            }
            None => false,
        }
    }

    pub fn activate_tab(&self, tab_id: TabId) -> bool {
        let mut registry = self.registry();
        if registry.tabs.contains_key(&tab_id) {
            registry.active = Some(tab_id);
            true
        } else {
            false
        }
    }

    pub fn close_tab(&self, tab_id: TabId) -> bool {
        let mut registry = self.registry();
        if registry.active == Some(tab_id) {
            registry.active = None;
        }
        let removed = registry.tabs.remove(&tab_id).is_some();
        if removed {
            tracing::debug!(tab_id, "Tab closed");
        }
        removed
    }

    /// Tabs whose URL contains `pattern`
    pub fn query_tabs(&self, pattern: &str) -> Vec<TabId> {
        self.registry()
            .tabs
            .iter()
            .filter(|(_, entry)| entry.url.contains(pattern))
            .map(|(id, _)| *id)
            .collect()
    }

    /// The focused tab and its URL
    pub fn active_tab(&self) -> Option<(TabId, String)> {
        let registry = self.registry();
        let id = registry.active?;
        registry.tabs.get(&id).map(|entry| (id, entry.url.clone()))
    }

    fn endpoint(&self, tab_id: TabId) -> Option<Arc<dyn AgentEndpoint>> {
        self.registry()
            .tabs
            .get(&tab_id)
            .map(|entry| entry.endpoint.clone())
    }

    // ============================================
    // Routing
    // ============================================

    /// Deliver a request to one tab
    pub async fn send_to_tab(&self, tab_id: TabId, request: Request) -> Response {
        match self.endpoint(tab_id) {
            Some(endpoint) => endpoint.deliver(request).await,
            None => Response::failure(format!("tab {} is closed", tab_id)),
        }
    }

    /// Send `request` to every tab matching `pattern` and wait up to the
    /// grace window for the first positive ack.
    ///
    /// Deliveries keep running after the first ack; later successes are
    /// simply not waited for.
    pub async fn broadcast(&self, request: Request, pattern: &str) -> BroadcastOutcome {
        let targets: Vec<(TabId, Arc<dyn AgentEndpoint>)> = {
            let registry = self.registry();
            registry
                .tabs
                .iter()
                .filter(|(_, entry)| entry.url.contains(pattern))
                .map(|(id, entry)| (*id, entry.endpoint.clone()))
                .collect()
        };

        let target_ids: Vec<TabId> = targets.iter().map(|(id, _)| *id).collect();
        tracing::debug!(
            action = request.action(),
            targets = target_ids.len(),
            "Broadcasting request"
        );

        let mut pending: FuturesUnordered<_> = targets
            .into_iter()
            .map(|(tab_id, endpoint)| {
                let request = request.clone();
                let task = tokio::spawn(async move { endpoint.deliver(request).await });
                async move { (tab_id, task.await) }
            })
            .collect();

        let first_ack = tokio::time::timeout(self.ack_grace, async {
            while let Some((tab_id, joined)) = pending.next().await {
                match joined {
                    Ok(response) if response.is_success() => return Some((tab_id, response)),
                    Ok(response) => {
                        tracing::debug!(tab_id, error = ?response.error, "Negative ack");
                    }
                    Err(e) => {
                        tracing::warn!(tab_id, error = %e, "Agent delivery task failed");
                    }
                }
            }
            None
        })
        .await
        .unwrap_or(None);

        BroadcastOutcome {
            targets: target_ids,
            first_ack,
        }
    }

    /// Validate and serve a raw request from another context
    pub async fn handle(&self, raw: Value) -> Response {
        let request = match parse_request(raw) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected message");
                return Response::from(&e);
            }
        };

        match &request {
            Request::CollectSubtitles { video_id } => {
                let pattern = self.pattern_for_video(video_id);
                let outcome = self.broadcast(request.clone(), &pattern).await;
                match outcome.first_ack {
                    Some((_, response)) => response,
                    None if outcome.targets.is_empty() => {
                        Response::failure("no video tab is open")
                    }
                    None => Response::failure("no tab collected captions"),
                }
            }
            Request::CheckIfYouTube => self.check_site(),
            Request::ExtractWebpageContent { .. } => {
                Response::failure("extractWebpageContent is not handled here")
            }
            Request::SendSubtitleToSidePanel { subtitle_text } => {
                match self.forward_subtitle_text(subtitle_text) {
                    Ok(true) => Response::ok(None),
                    Ok(false) => Response::failure("No subtitle text provided"),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to queue subtitle text");
                        Response::from(&e)
                    }
                }
            }
        }
    }

    /// Whether the focused page is a supported video site.
    ///
    /// Falls back to the last URL seen when no tab is focused.
    pub fn check_site(&self) -> Response {
        let url = match self.active_tab() {
            Some((_, url)) if !url.is_empty() => {
                if let Err(e) = self.store.set_value(StoreKey::LastVisitedUrl, &url) {
                    tracing::warn!(error = %e, "Failed to record last visited URL");
                }
                Some(url)
            }
            _ => self
                .store
                .get_string(StoreKey::LastVisitedUrl)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Failed to read last visited URL");
                    None
                }),
        };

        match url {
            Some(url) => {
                let supported = detect_platform(&url).is_some();
                let message = if supported {
                    "Current page supports chat"
                } else {
                    "Current page does not support chat"
                };
                Response::site_check(supported, message)
            }
            None => Response::site_check(false, "Unable to determine the current page"),
        }
    }

    /// Queue quoted caption text for the panel
    fn forward_subtitle_text(&self, text: &str) -> Result<bool> {
        if text.trim().is_empty() {
            return Ok(false);
        }
        self.store.set_value(StoreKey::PendingSubtitleText, &text)?;
        Ok(true)
    }
}
