//! Token stream assembly for the in-progress assistant message.

use deepagents_protocol::Message;

/// Append a streamed fragment to the last message if it is still streaming.
/// Returns false when the fragment was dropped.
pub fn append_fragment(messages: &mut [Message], fragment: &str) -> bool {
    match messages.last_mut() {
        Some(message) if message.streaming => {
            message.content.push_str(fragment);
            true
        }
        _ => false,
    }
}

/// Close the in-progress message: clear its streaming flag and stamp it.
/// Returns false when nothing was streaming.
pub fn finalize(messages: &mut [Message], now: &str) -> bool {
    match messages.iter_mut().rev().find(|m| m.streaming) {
        Some(message) => {
            message.streaming = false;
            message.timestamp = Some(now.to_string());
            true
        }
        None => false,
    }
}

/// Index of the message currently receiving tokens
pub fn streaming_index(messages: &[Message]) -> Option<usize> {
    messages.iter().rposition(|m| m.streaming)
}
