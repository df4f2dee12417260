//! Channel subscription bookkeeping.
//!
//! Tracks which session channel this client is a member of and turns
//! enter/leave requests into subscribe/unsubscribe intents on the transport.
//! It never touches the session store.

use std::sync::Arc;

use deepagents_protocol::ChannelCommand;
use tracing::debug;

/// Sequence number of a physical link. Each successful reconnect starts a
/// new one.
pub type LinkId = u64;

/// The seam between subscription logic and the persistent connection
pub trait ChannelTransport: Send + Sync {
    /// Establish the connection if it does not exist yet. Idempotent.
    fn connect(&self);

    /// Queue a command for delivery and return the link it is bound for.
    /// A command still queued when that link drops is discarded.
    fn emit(&self, command: ChannelCommand) -> LinkId;

    /// Tear the connection down for good.
    fn disconnect(&self);
}

struct Membership {
    session_id: String,
    /// Link the latest subscribe for this session went out on
    link: LinkId,
}

pub struct SubscriptionManager {
    transport: Arc<dyn ChannelTransport>,
    current: Option<Membership>,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self {
            transport,
            current: None,
        }
    }

    /// Session whose channel is currently subscribed
    pub fn current(&self) -> Option<&str> {
        self.current.as_ref().map(|m| m.session_id.as_str())
    }

    /// Subscribe to the session's channel unless it already is the current one.
    /// Returns whether a subscribe intent was issued.
    pub fn enter_session(&mut self, session_id: &str) -> bool {
        if self.current() == Some(session_id) {
            debug!(
                component = "subscription",
                event = "subscription.enter.skipped",
                session_id = %session_id,
                "Already subscribed"
            );
            return false;
        }

        self.transport.connect();
        let link = self
            .transport
            .emit(ChannelCommand::subscribe_session(session_id));
        self.current = Some(Membership {
            session_id: session_id.to_string(),
            link,
        });
        debug!(
            component = "subscription",
            event = "subscription.entered",
            session_id = %session_id,
            link,
            "Subscribed to session channel"
        );
        true
    }

    /// Unsubscribe from the session's channel. The current record is only
    /// cleared when it names this session, so a late leave for an older
    /// session cannot drop the newer subscription.
    pub fn leave_session(&mut self, session_id: &str) {
        self.transport
            .emit(ChannelCommand::unsubscribe_session(session_id));
        if self.current() == Some(session_id) {
            self.current = None;
        }
        debug!(
            component = "subscription",
            event = "subscription.left",
            session_id = %session_id,
            "Unsubscribed from session channel"
        );
    }

    /// Re-issue the subscribe intent for the current session on `link`,
    /// unless the latest subscribe was already bound for it. Bypasses the
    /// idempotence guard of `enter_session`.
    pub fn resubscribe(&mut self, link: LinkId) -> bool {
        let Some(membership) = self.current.as_mut() else {
            return false;
        };
        if membership.link >= link {
            debug!(
                component = "subscription",
                event = "subscription.resubscribe.skipped",
                session_id = %membership.session_id,
                link,
                "Subscribe already sent on this link"
            );
            return false;
        }

        membership.link = self
            .transport
            .emit(ChannelCommand::subscribe_session(&membership.session_id));
        debug!(
            component = "subscription",
            event = "subscription.resubscribed",
            session_id = %membership.session_id,
            link = membership.link,
            "Resubscribed to session channel"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;

    fn manager() -> (Arc<RecordingTransport>, SubscriptionManager) {
        let transport = Arc::new(RecordingTransport::default());
        let manager = SubscriptionManager::new(transport.clone());
        (transport, manager)
    }

    #[test]
    fn enter_twice_subscribes_once() {
        let (transport, mut subs) = manager();

        assert!(subs.enter_session("S1"));
        assert!(!subs.enter_session("S1"));

        assert_eq!(
            transport.commands(),
            vec![ChannelCommand::subscribe_session("S1")]
        );
        assert_eq!(subs.current(), Some("S1"));
    }

    #[test]
    fn enter_connects_lazily() {
        let (transport, mut subs) = manager();
        assert_eq!(transport.connects(), 0);

        subs.enter_session("S1");
        assert_eq!(transport.connects(), 1);
    }

    #[test]
    fn leave_clears_matching_record() {
        let (transport, mut subs) = manager();
        subs.enter_session("S1");
        subs.leave_session("S1");

        assert_eq!(subs.current(), None);
        assert_eq!(
            transport.commands(),
            vec![
                ChannelCommand::subscribe_session("S1"),
                ChannelCommand::unsubscribe_session("S1"),
            ]
        );
    }

    #[test]
    fn stale_leave_keeps_newer_subscription() {
        let (transport, mut subs) = manager();
        subs.enter_session("S1");
        subs.enter_session("S2");
        subs.leave_session("S1");

        assert_eq!(subs.current(), Some("S2"));
        assert_eq!(
            transport.commands().last(),
            Some(&ChannelCommand::unsubscribe_session("S1"))
        );
    }

    #[test]
    fn resubscribe_bypasses_idempotence_guard() {
        let (transport, mut subs) = manager();
        subs.enter_session("S1");
        transport.clear();
        transport.set_link(2);

        assert!(subs.resubscribe(2));
        assert!(!subs.resubscribe(2));
        assert_eq!(
            transport.commands(),
            vec![ChannelCommand::subscribe_session("S1")]
        );
        assert_eq!(subs.current(), Some("S1"));
    }

    #[test]
    fn subscribe_already_bound_for_new_link_is_not_repeated() {
        let (transport, mut subs) = manager();
        transport.set_link(2);
        subs.enter_session("S2");

        assert!(!subs.resubscribe(2));
        assert_eq!(
            transport.commands(),
            vec![ChannelCommand::subscribe_session("S2")]
        );

        // A later link still gets one.
        transport.set_link(3);
        assert!(subs.resubscribe(3));
        assert_eq!(transport.commands().len(), 2);
    }

    #[test]
    fn resubscribe_without_membership_is_noop() {
        let (transport, mut subs) = manager();
        subs.enter_session("S1");
        subs.leave_session("S1");
        transport.clear();

        assert!(!subs.resubscribe(5));
        assert!(transport.commands().is_empty());
    }
}
