//! Client → Server channel commands

use serde::{Deserialize, Serialize};

use crate::channel_name;

/// Membership intents sent over the persistent connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelCommand {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

impl ChannelCommand {
    pub fn subscribe_session(session_id: &str) -> Self {
        ChannelCommand::Subscribe {
            channel: channel_name(session_id),
        }
    }

    pub fn unsubscribe_session(session_id: &str) -> Self {
        ChannelCommand::Unsubscribe {
            channel: channel_name(session_id),
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            ChannelCommand::Subscribe { channel } | ChannelCommand::Unsubscribe { channel } => {
                channel
            }
        }
    }
}
