//! Well-known store keys
//!
//! Every context reads and writes the same keys, so the spelling here is part
//! of the cross-context contract.

/// Keys with a fixed meaning in the shared state store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// Latest [`VideoContext`](crate::types::VideoContext)
    CurrentVideoInfo,
    /// Latest published [`CaptionSet`](crate::types::CaptionSet)
    CurrentSubtitles,
    /// Persisted [`ChatMode`](crate::types::ChatMode)
    ChatMode,
    /// Persisted chat history
    ChatHistory,
    /// Negative cache of video ids without captions
    NoSubtitleVideos,
    /// Backend credential
    AuthToken,
    /// Backend base URL
    ApiUrl,
    /// Last URL seen by a site check
    LastVisitedUrl,
    /// Caption text queued for the panel
    PendingSubtitleText,
    /// Whether agents collect captions on navigation
    AutoCollectEnabled,
}

impl StoreKey {
    pub const ALL: [StoreKey; 10] = [
        StoreKey::CurrentVideoInfo,
        StoreKey::CurrentSubtitles,
        StoreKey::ChatMode,
        StoreKey::ChatHistory,
        StoreKey::NoSubtitleVideos,
        StoreKey::AuthToken,
        StoreKey::ApiUrl,
        StoreKey::LastVisitedUrl,
        StoreKey::PendingSubtitleText,
        StoreKey::AutoCollectEnabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::CurrentVideoInfo => "currentVideoInfo",
            StoreKey::CurrentSubtitles => "currentSubtitles",
            StoreKey::ChatMode => "chatMode",
            StoreKey::ChatHistory => "chatHistory",
            StoreKey::NoSubtitleVideos => "noSubtitleVideos",
            StoreKey::AuthToken => "authToken",
            StoreKey::ApiUrl => "apiUrl",
            StoreKey::LastVisitedUrl => "lastVisitedUrl",
            StoreKey::PendingSubtitleText => "pendingSubtitleText",
            StoreKey::AutoCollectEnabled => "autoCollectEnabled",
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StoreKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StoreKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown store key: {}", s))
    }
}

impl From<StoreKey> for String {
    fn from(key: StoreKey) -> Self {
        key.as_str().to_string()
    }
}
