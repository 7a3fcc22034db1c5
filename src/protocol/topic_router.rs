// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT topic routing for message handlers.
//!
//! The [`TopicRouter`] maps subscription filters to the handlers registered
//! for them and dispatches each inbound message to every handler whose
//! filter matches the message topic.
//!
//! ```text
//! MQTT Message: device1/d20/speed → {"value":"fast"}
//!                     ↓
//!             TopicRouter.route()
//!                     ↓
//!     Match "device1/d20/speed" against registered filters
//!                     ↓
//!          handler.on_message(topic, payload)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::subscription::MessageHandler;

/// Routes MQTT messages to registered handlers.
///
/// Filters follow MQTT syntax: `+` matches exactly one level and a trailing
/// `#` matches any number of remaining levels.
#[derive(Default)]
pub struct TopicRouter {
    /// Map from subscription filter to the handler registered for it.
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
}

impl TopicRouter {
    /// Creates a new empty topic router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a subscription filter.
    ///
    /// If a previous registration exists for this filter, it will be replaced.
    pub fn register(&self, filter: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let filter = filter.into();
        tracing::debug!(filter = %filter, "Registering handler for routing");
        self.handlers.write().insert(filter, handler);
    }

    /// Unregisters the handler for a filter.
    ///
    /// Returns `true` if a handler was previously registered.
    pub fn unregister(&self, filter: &str) -> bool {
        tracing::debug!(filter = %filter, "Unregistering handler from routing");
        self.handlers.write().remove(filter).is_some()
    }

    /// Routes a message to every handler whose filter matches `topic`.
    ///
    /// Returns the number of handlers the message was delivered to.
    pub fn route(&self, topic: &str, payload: &[u8]) -> usize {
        // Handlers run outside the lock so they may register or unregister.
        let matching: Vec<Arc<dyn MessageHandler>> = self
            .handlers
            .read()
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        if matching.is_empty() {
            tracing::trace!(topic = %topic, "No handler registered for topic");
        }

        for handler in &matching {
            handler.on_message(topic, payload);
        }
        matching.len()
    }

    /// Removes every registration.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Returns the number of registered filters.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl std::fmt::Debug for TopicRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("TopicRouter")
            .field("filters", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Returns `true` if an MQTT subscription filter matches a topic name.
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    // Topics starting with `$` are not matched by leading wildcards.
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_handler() -> (Arc<AtomicUsize>, Arc<dyn MessageHandler>) {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let handler: Arc<dyn MessageHandler> = Arc::new(move |_: &str, _: &[u8]| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn exact_filter_matches() {
        assert!(topic_matches("device1/d20/speed", "device1/d20/speed"));
        assert!(!topic_matches("device1/d20/speed", "device1/d20/speed/ack"));
        assert!(!topic_matches("device1/d20/speed/ack", "device1/d20/speed"));
    }

    #[test]
    fn single_level_wildcard() {
        assert!(topic_matches("device1/+/speed", "device1/d20/speed"));
        assert!(!topic_matches("device1/+", "device1/d20/speed"));
        assert!(topic_matches("+/+/+", "a/b/c"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(topic_matches("device1/#", "device1/d20/roll/ack"));
        assert!(topic_matches("device1/d20/#", "device1/d20"));
        assert!(topic_matches("#", "anything/at/all"));
    }

    #[test]
    fn system_topics_need_explicit_prefix() {
        assert!(!topic_matches("#", "$SYS/uptime"));
        assert!(topic_matches("$SYS/#", "$SYS/uptime"));
    }

    #[test]
    fn router_register_and_route() {
        let router = TopicRouter::new();
        let (count, handler) = counting_handler();
        router.register("device1/d20/speed", handler);

        assert_eq!(router.route("device1/d20/speed", b"{}"), 1);
        assert_eq!(router.route("device1/d20/roll", b"{}"), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn router_unregister() {
        let router = TopicRouter::new();
        let (count, handler) = counting_handler();
        router.register("device1/d20/speed", handler);

        assert!(router.unregister("device1/d20/speed"));
        assert!(!router.unregister("device1/d20/speed"));
        assert_eq!(router.route("device1/d20/speed", b"{}"), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn router_replace_registration() {
        let router = TopicRouter::new();
        let (first, first_handler) = counting_handler();
        let (second, second_handler) = counting_handler();

        router.register("device1/d20/speed", first_handler);
        router.register("device1/d20/speed", second_handler);
        router.route("device1/d20/speed", b"{}");

        assert_eq!(router.handler_count(), 1);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn router_delivers_to_every_matching_filter() {
        let router = TopicRouter::new();
        let (exact, exact_handler) = counting_handler();
        let (wild, wild_handler) = counting_handler();
        router.register("device1/d20/roll/ack", exact_handler);
        router.register("device1/#", wild_handler);

        assert_eq!(router.route("device1/d20/roll/ack", b"ok"), 2);
        assert_eq!(exact.load(Ordering::SeqCst), 1);
        assert_eq!(wild.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_reenter_router() {
        let router = Arc::new(TopicRouter::new());
        let inner = Arc::clone(&router);
        router.register(
            "control/reset",
            Arc::new(move |_: &str, _: &[u8]| {
                inner.clear();
            }),
        );

        assert_eq!(router.route("control/reset", b""), 1);
        assert_eq!(router.handler_count(), 0);
    }
}
