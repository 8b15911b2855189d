//! Typing indicators as seen from a client.

use chatline_protocol::{ChatId, ClientEvent, ServerEvent, UserId};
use std::time::{Duration, Instant};

/// Quiet period after the last keystroke before `typing:stop` is sent.
pub const TYPING_QUIET_PERIOD: Duration = Duration::from_secs(1);

/// How long a remote typist is shown without hearing from them again.
pub const TYPING_SAFETY_TIMEOUT: Duration = Duration::from_secs(5);

/// Sender-side debouncer for one chat input.
///
/// Call [`on_input`](Self::on_input) on every keystroke and
/// [`poll`](Self::poll) whenever the local timer fires.
#[derive(Debug)]
pub struct TypingDebouncer {
    chat_id: ChatId,
    user_id: UserId,
    user_name: String,
    quiet: Duration,
    deadline: Option<Instant>,
}

impl TypingDebouncer {
    /// Create a debouncer with the default quiet period.
    pub fn new(
        chat_id: impl Into<ChatId>,
        user_id: impl Into<UserId>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            quiet: TYPING_QUIET_PERIOD,
            deadline: None,
        }
    }

    /// Override the quiet period.
    #[must_use]
    pub fn with_quiet_period(mut self, quiet: Duration) -> Self {
        self.quiet = quiet;
        self
    }

    /// Whether a `typing:start` is outstanding.
    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the pending `typing:stop` is due.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Register a keystroke that left `text` in the input.
    ///
    /// Returns `typing:start` on the first non-blank keystroke. Clearing the
    /// input while typing stops immediately.
    pub fn on_input(&mut self, text: &str, now: Instant) -> Option<ClientEvent> {
        if text.trim().is_empty() {
            return self.stop();
        }

        let started = self.deadline.is_none();
        self.deadline = Some(now + self.quiet);
        started.then(|| {
            ClientEvent::typing_start(
                self.chat_id.clone(),
                self.user_id.clone(),
                self.user_name.clone(),
            )
        })
    }

    /// Fire the quiet timer.
    pub fn poll(&mut self, now: Instant) -> Option<ClientEvent> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.stop(),
            _ => None,
        }
    }

    /// The message was sent; stop without waiting for the quiet period.
    pub fn on_send(&mut self) -> Option<ClientEvent> {
        self.stop()
    }

    fn stop(&mut self) -> Option<ClientEvent> {
        self.deadline
            .take()
            .map(|_| ClientEvent::typing_stop(self.chat_id.clone(), self.user_id.clone()))
    }
}

#[derive(Debug, Clone)]
struct Typist {
    user_id: UserId,
    user_name: String,
    expires_at: Instant,
}

/// Receiver-side view of who is typing in one chat.
#[derive(Debug)]
pub struct TypingTracker {
    chat_id: ChatId,
    own_user: UserId,
    safety_timeout: Duration,
    /// In the order they started typing.
    typists: Vec<Typist>,
}

impl TypingTracker {
    /// Track typists in `chat_id`, ignoring `own_user`.
    pub fn new(chat_id: impl Into<ChatId>, own_user: impl Into<UserId>) -> Self {
        Self {
            chat_id: chat_id.into(),
            own_user: own_user.into(),
            safety_timeout: TYPING_SAFETY_TIMEOUT,
            typists: Vec::new(),
        }
    }

    /// Override the safety timeout.
    #[must_use]
    pub fn with_safety_timeout(mut self, timeout: Duration) -> Self {
        self.safety_timeout = timeout;
        self
    }

    /// Apply a server event. Returns `true` if the typist set changed.
    pub fn apply(&mut self, event: &ServerEvent, now: Instant) -> bool {
        match event {
            ServerEvent::TypingStart(typing) => {
                if typing.chat_id != self.chat_id || typing.user_id == self.own_user {
                    return false;
                }
                let expires_at = now + self.safety_timeout;
                let existing = self.typists.iter_mut().find(|t| t.user_id == typing.user_id);
                if let Some(typist) = existing {
                    typist.expires_at = expires_at;
                    typist.user_name.clone_from(&typing.user_name);
                    return false;
                }
                self.typists.push(Typist {
                    user_id: typing.user_id.clone(),
                    user_name: typing.user_name.clone(),
                    expires_at,
                });
                true
            }
            ServerEvent::TypingStop(typing) => {
                if typing.chat_id != self.chat_id {
                    return false;
                }
                let before = self.typists.len();
                self.typists.retain(|t| t.user_id != typing.user_id);
                self.typists.len() != before
            }
            ServerEvent::UserOffline(user_id) => {
                let before = self.typists.len();
                self.typists.retain(|t| &t.user_id != user_id);
                self.typists.len() != before
            }
            _ => false,
        }
    }

    /// Forget typists whose stop never arrived.
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.typists.len();
        self.typists.retain(|t| t.expires_at > now);
        self.typists.len() != before
    }

    /// Display names of current typists.
    pub fn typists(&self) -> impl Iterator<Item = &str> {
        self.typists.iter().map(|t| t.user_name.as_str())
    }

    /// Text for the typing indicator, if anyone is typing.
    #[must_use]
    pub fn indicator_text(&self) -> Option<String> {
        let names: Vec<&str> = self.typists().collect();
        match names.as_slice() {
            [] => None,
            [one] => Some(format!("{one} is typing")),
            [first, second] => Some(format!("{first} and {second} are typing")),
            [first, rest @ ..] => Some(format!("{first} and {} others are typing", rest.len())),
        }
    }
}
