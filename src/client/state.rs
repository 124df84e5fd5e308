// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Chat view state
//
// The UI reads a `ChatView` snapshot out of a watch channel. Every update
// replaces the snapshot as a whole, so an observer never sees a message
// half-written.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: u64,
    pub role: Role,
    pub text: String,
    /// Rendered as an error notice rather than a reply.
    pub is_error: bool,
}

/// Where a send currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendPhase {
    Idle,
    TokenFetch,
    Connecting { attempt: u32 },
    Streaming,
    Retrying { attempt: u32, delay: Duration },
    Completed,
    Failed(String),
    Cancelled,
}

impl SendPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SendPhase::Completed | SendPhase::Failed(_) | SendPhase::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatView {
    pub messages: Vec<ChatMessage>,
    pub phase: SendPhase,
}

impl Default for ChatView {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            phase: SendPhase::Idle,
        }
    }
}

impl ChatView {
    pub fn message(&self, id: u64) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }
}

pub struct ChatStore {
    tx: watch::Sender<ChatView>,
    next_id: AtomicU64,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ChatView::default());
        Self {
            tx,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ChatView {
        self.tx.borrow().clone()
    }

    pub fn push(&self, role: Role, text: impl Into<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = ChatMessage {
            id,
            role,
            text: text.into(),
            is_error: false,
        };
        self.tx.send_modify(|view| view.messages.push(message));
        id
    }

    /// Replace a message's text with the cumulative text so far.
    pub fn replace_text(&self, id: u64, text: &str) {
        self.tx.send_modify(|view| {
            if let Some(m) = view.messages.iter_mut().find(|m| m.id == id) {
                m.text.clear();
                m.text.push_str(text);
            }
        });
    }

    pub fn remove(&self, id: u64) {
        self.tx.send_modify(|view| view.messages.retain(|m| m.id != id));
    }

    /// Turn an empty placeholder into an error notice. A placeholder that
    /// already holds partial text keeps it and the notice follows it.
    pub fn show_error(&self, id: u64, message: &str) {
        let notice_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tx.send_modify(|view| {
            let Some(pos) = view.messages.iter().position(|m| m.id == id) else {
                return;
            };
            if view.messages[pos].text.is_empty() {
                let m = &mut view.messages[pos];
                m.text.push_str(message);
                m.is_error = true;
            } else {
                view.messages.insert(
                    pos + 1,
                    ChatMessage {
                        id: notice_id,
                        role: Role::Assistant,
                        text: message.to_string(),
                        is_error: true,
                    },
                );
            }
        });
    }

    pub fn set_phase(&self, phase: SendPhase) {
        self.tx.send_modify(|view| view.phase = phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_publishes_whole_text() {
        let store = ChatStore::new();
        let rx = store.subscribe();
        let id = store.push(Role::Assistant, "");
        store.replace_text(id, "Hi");
        store.replace_text(id, "Hi there");
        assert_eq!(rx.borrow().message(id).unwrap().text, "Hi there");
    }

    #[test]
    fn error_replaces_empty_placeholder() {
        let store = ChatStore::new();
        let id = store.push(Role::Assistant, "");
        store.show_error(id, "upstream busy");

        let view = store.snapshot();
        assert_eq!(view.messages.len(), 1);
        assert!(view.messages[0].is_error);
        assert_eq!(view.messages[0].text, "upstream busy");
    }

    #[test]
    fn error_after_partial_text_is_appended() {
        let store = ChatStore::new();
        let id = store.push(Role::Assistant, "");
        store.replace_text(id, "Hal");
        store.show_error(id, "cut off");

        let view = store.snapshot();
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[0].text, "Hal");
        assert!(!view.messages[0].is_error);
        assert!(view.messages[1].is_error);
    }

    #[test]
    fn remove_drops_message() {
        let store = ChatStore::new();
        let user = store.push(Role::User, "hello");
        let placeholder = store.push(Role::Assistant, "");
        store.remove(placeholder);

        let view = store.snapshot();
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].id, user);
    }
}
