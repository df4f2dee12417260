//! Event router
//!
//! Single entry point from the connection into the store. Every event is
//! checked against the active session once, here, before any handler runs.

use deepagents_protocol::ChannelEvent;
use tracing::{debug, trace};

use crate::store::SessionStore;

/// What the router did with an inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// The store was mutated
    Applied,
    /// Addressed to the active session but had nothing to act on
    Ignored { reason: &'static str },
    /// Addressed to another session (or none is active)
    Dropped,
}

impl Routed {
    pub fn changed_store(&self) -> bool {
        matches!(self, Routed::Applied)
    }
}

/// Apply `event` to `store` if it belongs to the active session.
pub fn route(store: &mut SessionStore, event: ChannelEvent, now: &str) -> Routed {
    if store.session_id() != Some(event.session()) {
        debug!(
            component = "router",
            event = "router.event.dropped",
            kind = event.kind(),
            target_session = %event.session(),
            active_session = ?store.session_id(),
            "Dropped event for inactive session"
        );
        return Routed::Dropped;
    }

    trace!(
        component = "router",
        event = "router.event.dispatch",
        kind = event.kind(),
        session_id = %event.session(),
    );

    match event {
        ChannelEvent::AgentToken { token, .. } => {
            if store.append_token(&token) {
                Routed::Applied
            } else {
                Routed::Ignored {
                    reason: "no streaming message",
                }
            }
        }

        ChannelEvent::ToolCallStart {
            tool_name, input, ..
        } => {
            store.start_tool_call(&tool_name, input, now);
            Routed::Applied
        }

        ChannelEvent::ToolCallComplete {
            tool_name,
            success,
            output,
            ..
        } => complete_tool_call(store, &tool_name, success, output),

        ChannelEvent::ToolResult { tool, result, .. } => {
            complete_tool_call(store, &tool, true, result)
        }

        ChannelEvent::AgentStatus {
            status, message, ..
        } => {
            store.set_agent_status(status, message);
            Routed::Applied
        }

        ChannelEvent::TodoUpdate { todos, .. } => {
            store.replace_todos(todos);
            Routed::Applied
        }

        ChannelEvent::FileUpdate { files, .. } => {
            store.replace_files(files);
            Routed::Applied
        }

        ChannelEvent::AgentComplete { .. } => {
            store.complete_turn(now);
            Routed::Applied
        }

        ChannelEvent::AgentError { error, .. } => {
            store.fail_agent(&error, now);
            Routed::Applied
        }
    }
}

fn complete_tool_call(
    store: &mut SessionStore,
    tool_name: &str,
    success: bool,
    output: String,
) -> Routed {
    if store.complete_tool_call(tool_name, success, output) {
        Routed::Applied
    } else {
        debug!(
            component = "router",
            event = "router.tool_call.unmatched",
            tool_name = %tool_name,
            "Completion without a running call"
        );
        Routed::Ignored {
            reason: "no running tool call",
        }
    }
}
