//! Typing indicator debouncing.
//!
//! Converts a stream of "text changed" notifications into at most one
//! `typing:start` per uninterrupted burst and exactly one `typing:stop` when
//! the burst ends. A burst ends when the input is cleared, a message is sent,
//! or no change arrives for the idle window.
//!
//! Time is an input: callers pass `now` and drive expiry with [`tick`].
//!
//! [`tick`]: TypingDebouncer::tick

use std::{collections::HashMap, ops::Sub, time::Duration};

use parley_proto::ConversationId;

/// Idle window after which an unrefreshed burst ends, in milliseconds.
pub const TYPING_IDLE_MS: u64 = 1000;

/// Outbound typing signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingSignal {
    /// Emit `typing{isTyping: true}`
    Start(ConversationId),
    /// Emit `typing{isTyping: false}`
    Stop(ConversationId),
}

/// Per-conversation typing burst tracker.
#[derive(Debug, Clone)]
pub struct TypingDebouncer<I> {
    idle: Duration,
    /// Active bursts and the time of their latest refresh
    bursts: HashMap<ConversationId, I>,
}

impl<I> TypingDebouncer<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create a debouncer with the given idle window.
    pub fn new(idle: Duration) -> Self {
        Self { idle, bursts: HashMap::new() }
    }

    /// True while a burst is active for `conversation`.
    #[must_use]
    pub fn is_typing(&self, conversation: &ConversationId) -> bool {
        self.bursts.contains_key(conversation)
    }

    /// Local input for `conversation` changed.
    ///
    /// With content: starts a burst (returning `Start`) or refreshes the
    /// active one (returning nothing). Without content: ends an active burst
    /// immediately.
    pub fn on_text_changed(
        &mut self,
        conversation: &ConversationId,
        has_content: bool,
        now: I,
    ) -> Option<TypingSignal> {
        if !has_content {
            return self.end(conversation);
        }

        match self.bursts.get_mut(conversation) {
            Some(last) => {
                *last = now;
                None
            },
            None => {
                self.bursts.insert(conversation.clone(), now);
                Some(TypingSignal::Start(conversation.clone()))
            },
        }
    }

    /// End the burst for `conversation` without waiting for the timer.
    ///
    /// Called on send and when the view leaves the conversation.
    pub fn end(&mut self, conversation: &ConversationId) -> Option<TypingSignal> {
        self.bursts.remove(conversation).map(|_| TypingSignal::Stop(conversation.clone()))
    }

    /// End every burst whose idle window has elapsed at `now`.
    ///
    /// Stops are returned in conversation order so drivers behave the same
    /// on every run.
    pub fn tick(&mut self, now: I) -> Vec<TypingSignal> {
        let mut expired: Vec<ConversationId> = self
            .bursts
            .iter()
            .filter(|(_, last)| elapsed(now, **last) >= self.idle)
            .map(|(conversation, _)| conversation.clone())
            .collect();
        expired.sort();

        for conversation in &expired {
            self.bursts.remove(conversation);
        }

        expired.into_iter().map(TypingSignal::Stop).collect()
    }

    /// Time from `now` until the earliest burst expires. `None` when idle.
    #[must_use]
    pub fn next_expiry(&self, now: I) -> Option<Duration> {
        self.bursts.values().map(|last| self.idle.saturating_sub(elapsed(now, *last))).min()
    }

    /// Forget all bursts without emitting anything.
    ///
    /// Used when the connection drops: there is no channel to send stops on,
    /// and peers clear their indicators when our presence changes.
    pub fn reset(&mut self) {
        self.bursts.clear();
    }
}

fn elapsed<I: Copy + Ord + Sub<Output = Duration>>(now: I, since: I) -> Duration {
    if now >= since { now - since } else { Duration::ZERO }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Milliseconds since test start.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct Ms(u64);

    impl Sub for Ms {
        type Output = Duration;
        fn sub(self, rhs: Self) -> Duration {
            Duration::from_millis(self.0 - rhs.0)
        }
    }

    fn debouncer() -> TypingDebouncer<Ms> {
        TypingDebouncer::new(Duration::from_millis(TYPING_IDLE_MS))
    }

    fn c1() -> ConversationId {
        ConversationId::from("c1")
    }

    #[test]
    fn one_start_per_burst_and_trailing_stop() {
        let mut typing = debouncer();

        assert_eq!(typing.on_text_changed(&c1(), true, Ms(0)), Some(TypingSignal::Start(c1())));
        assert_eq!(typing.on_text_changed(&c1(), true, Ms(200)), None);
        assert_eq!(typing.on_text_changed(&c1(), true, Ms(400)), None);

        assert!(typing.tick(Ms(1399)).is_empty());
        assert_eq!(typing.next_expiry(Ms(1399)), Some(Duration::from_millis(1)));

        assert_eq!(typing.tick(Ms(1400)), vec![TypingSignal::Stop(c1())]);
        assert!(typing.tick(Ms(5000)).is_empty());
        assert_eq!(typing.next_expiry(Ms(5000)), None);
    }

    #[test]
    fn new_burst_after_stop_starts_again() {
        let mut typing = debouncer();
        typing.on_text_changed(&c1(), true, Ms(0));
        typing.tick(Ms(1000));

        assert_eq!(typing.on_text_changed(&c1(), true, Ms(1500)), Some(TypingSignal::Start(c1())));
    }

    #[test]
    fn send_ends_burst_immediately() {
        let mut typing = debouncer();
        typing.on_text_changed(&c1(), true, Ms(0));

        assert_eq!(typing.end(&c1()), Some(TypingSignal::Stop(c1())));
        assert!(typing.tick(Ms(2000)).is_empty());
        assert_eq!(typing.end(&c1()), None);
    }

    #[test]
    fn clearing_input_ends_burst() {
        let mut typing = debouncer();
        assert_eq!(typing.on_text_changed(&c1(), false, Ms(0)), None);

        typing.on_text_changed(&c1(), true, Ms(10));
        assert_eq!(typing.on_text_changed(&c1(), false, Ms(20)), Some(TypingSignal::Stop(c1())));
        assert!(!typing.is_typing(&c1()));
    }

    #[test]
    fn conversations_expire_independently() {
        let mut typing = debouncer();
        let c2 = ConversationId::from("c2");
        typing.on_text_changed(&c1(), true, Ms(0));
        typing.on_text_changed(&c2, true, Ms(600));

        assert_eq!(typing.next_expiry(Ms(700)), Some(Duration::from_millis(300)));
        assert_eq!(typing.tick(Ms(1000)), vec![TypingSignal::Stop(c1())]);
        assert!(typing.is_typing(&c2));
        assert_eq!(typing.tick(Ms(1600)), vec![TypingSignal::Stop(c2)]);
    }
}
