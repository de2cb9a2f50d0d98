//! Ordered message log with a single mutable tail slot for the reply being
//! streamed.

use crate::error::{Error, Result};
use crate::message::{Message, MessagePatch};

/// Messages of the active session in arrival order.
///
/// History pages are only ever prepended and replies only ever appended or
/// patched at the tail, so both can proceed at the same time.
#[derive(Debug, Default)]
pub struct MessageTimeline {
    messages: Vec<Message>,
    /// Id of the assistant placeholder still receiving content. Always the
    /// last message when set.
    in_flight: Option<String>,
}

impl MessageTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn in_flight_id(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Optimistically append the user's message
    pub fn append_user(&mut self, content: impl Into<String>) -> &Message {
        self.push(Message::user(content))
    }

    /// Append the assistant placeholder that a reply will be patched into
    pub fn begin_assistant(&mut self) -> Result<&Message> {
        if self.in_flight.is_some() {
            return Err(Error::Busy);
        }
        let placeholder = Message::assistant_placeholder();
        self.in_flight = Some(placeholder.id.clone());
        Ok(self.push(placeholder))
    }

    /// Merge a patch into the in-flight message
    pub fn patch_assistant(&mut self, patch: &MessagePatch) -> Option<&Message> {
        let message = self.in_flight_mut()?;
        message.apply(patch);
        Some(&*message)
    }

    /// Close the in-flight slot; the message is immutable afterwards
    pub fn finalize(&mut self) -> Option<&Message> {
        self.in_flight_mut()?;
        self.in_flight = None;
        self.messages.last()
    }

    /// Insert an older page in front of everything loaded so far. Messages
    /// whose id is already in the timeline are skipped; returns how many were
    /// inserted.
    pub fn prepend(&mut self, page: Vec<Message>) -> usize {
        let page: Vec<Message> = page
            .into_iter()
            .filter(|m| self.get(&m.id).is_none())
            .collect();
        let count = page.len();
        self.messages.splice(0..0, page);
        count
    }

    /// Drop every message, including an unfinished reply
    pub fn clear(&mut self) {
        self.messages.clear();
        self.in_flight = None;
    }

    /// Find the query to re-submit when retrying `message_id`: the nearest
    /// user message before that assistant message.
    pub fn retry_query(&self, message_id: &str) -> Result<String> {
        let index = self
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| Error::MessageNotFound(message_id.to_string()))?;

        if !self.messages[index].is_assistant() {
            return Err(Error::NotRetryable(format!(
                "{} is not an assistant message",
                message_id
            )));
        }
        if self.in_flight.as_deref() == Some(message_id) {
            return Err(Error::Busy);
        }

        self.messages[..index]
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.content.clone())
            .ok_or_else(|| {
                Error::NotRetryable(format!("no user message precedes {}", message_id))
            })
    }

    fn push(&mut self, message: Message) -> &Message {
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    fn in_flight_mut(&mut self) -> Option<&mut Message> {
        let id = self.in_flight.as_deref()?;
        self.messages.last_mut().filter(|m| m.id == id)
    }
}
