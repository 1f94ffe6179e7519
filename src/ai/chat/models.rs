//! The core models for managing a stateful chat with an LLM.
use serde::{Deserialize, Serialize};

/// Synthetic first message that makes the assistant greet the user
/// before they have said anything.
pub const INTRODUCTION_TRIGGER: &str =
    "Please introduce yourself according to your system instructions.";

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Message {
            role,
            content: content.to_string(),
        }
    }

    fn is_introduction_trigger(&self) -> bool {
        self.role == Role::User && self.content == INTRODUCTION_TRIGGER
    }
}

/// The conversation store. Append-only: messages are never edited,
/// reordered or removed for the lifetime of the session.
#[derive(Default, Debug)]
pub struct Transcript(Vec<Message>);

impl Transcript {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn append(&mut self, msg: Message) {
        self.0.push(msg)
    }

    /// The full ordered sequence, including the introduction trigger,
    /// to send to the completion endpoint.
    pub fn snapshot(&self) -> Vec<Message> {
        self.0.clone()
    }

    /// Messages to show the user. Only a trigger in first position is
    /// hidden; the same text typed later by a person is shown.
    pub fn display_view(&self) -> Vec<Message> {
        let skip = self
            .0
            .first()
            .is_some_and(Message::is_introduction_trigger);
        self.0.iter().skip(usize::from(skip)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.0.iter()
    }
}
