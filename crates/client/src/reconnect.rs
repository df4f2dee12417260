//! Reconnection policy: retry timing for the transport, and restoring
//! channel membership once a new physical connection is up.

use std::time::Duration;

use tracing::{info, warn};

use crate::subscription::{LinkId, SubscriptionManager};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;

/// Fixed-delay, bounded retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }

    /// Delay before the 1-based `attempt`, or `None` once the budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt >= 1 && attempt <= self.max_attempts).then_some(self.delay)
    }
}

/// Re-issue the subscription for the active session after a reconnect.
///
/// A fresh connection carries no memory of earlier subscriptions, so this
/// bypasses the idempotence guard of `enter_session`. A session entered
/// after `link` came up already subscribed on it and is left alone.
/// Returns whether a subscribe intent was emitted.
pub fn restore_membership(
    subscriptions: &mut SubscriptionManager,
    attempt: u32,
    link: LinkId,
) -> bool {
    let restored = subscriptions.resubscribe(link);
    match subscriptions.current() {
        Some(session_id) => info!(
            component = "reconnect",
            event = "reconnect.resubscribed",
            session_id = %session_id,
            attempt,
            link,
            restored,
            "Restored session subscription after reconnect"
        ),
        None => warn!(
            component = "reconnect",
            event = "reconnect.no_session",
            attempt,
            link,
            "Reconnected with no active session to restore"
        ),
    }
    restored
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use deepagents_protocol::ChannelCommand;

    use super::*;
    use crate::testing::RecordingTransport;

    #[test]
    fn next_delay_is_fixed_until_budget_exhausted() {
        let policy = ReconnectPolicy::new(Duration::from_millis(250), 3);
        assert_eq!(policy.next_delay(0), None);
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(250)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(250)));
        assert_eq!(policy.next_delay(4), None);
    }

    #[test]
    fn zero_attempt_budget_never_retries() {
        let policy = ReconnectPolicy::new(Duration::from_millis(10), 0);
        assert_eq!(policy.next_delay(1), None);
    }

    #[test]
    fn restore_membership_resubscribes_active_session_once() {
        let transport = Arc::new(RecordingTransport::default());
        let mut subscriptions = SubscriptionManager::new(transport.clone());
        subscriptions.enter_session("S1");
        transport.clear();
        transport.set_link(2);

        assert!(restore_membership(&mut subscriptions, 1, 2));
        assert!(!restore_membership(&mut subscriptions, 1, 2));
        assert_eq!(
            transport.commands(),
            vec![ChannelCommand::subscribe_session("S1")]
        );
    }

    #[test]
    fn restore_membership_without_session_is_noop() {
        let transport = Arc::new(RecordingTransport::default());
        let mut subscriptions = SubscriptionManager::new(transport.clone());

        assert!(!restore_membership(&mut subscriptions, 2, 3));
        assert!(transport.commands().is_empty());
    }
}
