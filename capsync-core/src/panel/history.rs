//! Chat history helpers

use crate::store::{StateStore, StoreKey};
use crate::types::Message;

/// Drop every user and assistant message, keeping system notices
pub fn retain_system_only(history: &mut Vec<Message>) {
    history.retain(Message::is_system);
}

/// Whether the history holds at least one user or assistant message
pub fn has_conversation(history: &[Message]) -> bool {
    history.iter().any(|m| !m.is_system())
}

/// Write the history to the store. Failures are logged, not returned:
/// the in-memory history stays authoritative for this panel.
pub fn persist(store: &StateStore, history: &[Message]) {
    if let Err(e) = store.set_value(StoreKey::ChatHistory, &history) {
        tracing::warn!(error = %e, messages = history.len(), "Failed to persist chat history");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_system_only() {
        let mut history = vec![
            Message::system("welcome"),
            Message::user("q"),
            Message::assistant("a"),
            Message::system("switched"),
        ];
        assert!(has_conversation(&history));

        retain_system_only(&mut history);
        assert_eq!(history.len(), 2);
        assert!(!has_conversation(&history));
    }

    #[test]
    fn test_persist_round_trips() {
        let store = StateStore::open_in_memory().unwrap();
        let history = vec![Message::user("hello")];
        persist(&store, &history);
        assert_eq!(store.chat_history().unwrap(), history);
    }
}
