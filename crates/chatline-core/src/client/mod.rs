//! Client-side protocol state.
//!
//! These types hold the state a client keeps around the realtime channel:
//! debounced typing notifications, the typing indicator for an open chat and
//! the local side of a call. They are driven with explicit timestamps so the
//! caller owns the timers.

mod call;
mod typing;

pub use call::{CallClient, CallClientError, CallStatus, CallUpdate, DIAL_TIMEOUT};
pub use typing::{TypingDebouncer, TypingTracker, TYPING_QUIET_PERIOD, TYPING_SAFETY_TIMEOUT};
