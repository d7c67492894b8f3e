//! Client-local mirror of a room's document.
//!
//! The replica only moves forward in two ways: a local edit is applied
//! immediately and turned into an outbound message, or an inbound update
//! overwrites the field wholesale. There is no merge and no cursor
//! preservation; concurrent edits resolve as last write wins on the
//! server.

use crate::protocol::{ClientMessage, Language, ServerMessage};

/// Text shown before anyone in the room has typed.
pub const PLACEHOLDER_TEXT: &str = "//Start coding here...";

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentReplica {
    text: String,
    language: Language,
}

impl Default for DocumentReplica {
    fn default() -> Self {
        Self {
            text: PLACEHOLDER_TEXT.to_string(),
            language: Language::default(),
        }
    }
}

impl DocumentReplica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    /// Apply a local edit and produce the `codeChange` announcing it.
    pub fn local_edit(&mut self, room_id: &str, text: impl Into<String>) -> ClientMessage {
        self.text = text.into();
        ClientMessage::code_change(room_id, self.text.clone())
    }

    /// Apply a local language switch and produce the `languageChange`.
    pub fn local_language(&mut self, room_id: &str, language: impl Into<Language>) -> ClientMessage {
        self.language = language.into();
        ClientMessage::language_change(room_id, self.language.clone())
    }

    /// Overwrite from an inbound update.
    ///
    /// Returns `true` if the message targeted the replica at all;
    /// presence and typing messages are not the replica's concern.
    pub fn apply_remote(&mut self, msg: &ServerMessage) -> bool {
        match msg {
            ServerMessage::CodeUpdate(text) => {
                self.text.clone_from(text);
                true
            }
            ServerMessage::LanguageUpdate(language) => {
                self.language = language.clone();
                true
            }
            ServerMessage::UserJoined(_) | ServerMessage::UserTyping(_) => false,
        }
    }

    /// Back to the state of a client that has not joined anything.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
