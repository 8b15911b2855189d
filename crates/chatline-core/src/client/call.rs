//! Call signaling as seen from one client.
//!
//! [`CallClient`] tracks the local side of a call and produces the protocol
//! events a client sends. It knows nothing about media; session descriptions
//! and candidates are opaque values handed to whatever drives the peer
//! connection.

use chatline_protocol::{ClientEvent, ServerEvent, UserId};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// How long an outgoing call may go unanswered before the client gives up.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(45);

/// Local call status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallStatus {
    #[default]
    Idle,
    /// We dialed and wait for an answer.
    Calling,
    /// Someone is calling us.
    Ringing,
    Connected,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Calling => "calling",
            Self::Ringing => "ringing",
            Self::Connected => "connected",
        })
    }
}

/// Local call errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallClientError {
    #[error("Already in a call ({0})")]
    Busy(CallStatus),

    #[error("Cannot call yourself")]
    SelfCall,

    #[error("No incoming call")]
    NoIncomingCall,
}

/// What a server event did to the local call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallUpdate {
    /// Nothing relevant happened.
    None,
    /// A call is ringing; the ringing acknowledgment should be sent.
    Incoming { from: UserId, ack: ClientEvent },
    /// The peer's phone is ringing.
    PeerRinging,
    /// The peer answered; apply this remote description.
    Answered { answer: Value },
    /// A remote candidate is ready to apply.
    Candidate,
    /// The call is over. Nothing should be sent back.
    Closed { reason: &'static str },
}

/// One client's side of call signaling.
#[derive(Debug)]
pub struct CallClient {
    user_id: UserId,
    status: CallStatus,
    remote_user: Option<UserId>,
    incoming_offer: Option<Value>,
    has_remote_description: bool,
    pending_candidates: Vec<Value>,
    ready_candidates: Vec<Value>,
    peer_ringing: bool,
    dialed_at: Option<Instant>,
    dial_timeout: Duration,
}

impl CallClient {
    /// Create an idle call client for `user_id`.
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            status: CallStatus::Idle,
            remote_user: None,
            incoming_offer: None,
            has_remote_description: false,
            pending_candidates: Vec::new(),
            ready_candidates: Vec::new(),
            peer_ringing: false,
            dialed_at: None,
            dial_timeout: DIAL_TIMEOUT,
        }
    }

    /// Override the dial timeout.
    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    #[must_use]
    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// The other party, if any.
    #[must_use]
    pub fn remote_user(&self) -> Option<&str> {
        self.remote_user.as_deref()
    }

    /// Whether the peer acknowledged our offer as ringing.
    #[must_use]
    pub fn peer_ringing(&self) -> bool {
        self.peer_ringing
    }

    /// Candidates received before the remote description, still held back.
    #[must_use]
    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Take remote candidates that can be applied now.
    pub fn take_candidates(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.ready_candidates)
    }

    /// Dial `to` with a local offer.
    ///
    /// # Errors
    ///
    /// Returns an error if a call is already in progress or `to` is us.
    pub fn start_call(
        &mut self,
        to: &str,
        offer: Value,
        now: Instant,
    ) -> Result<ClientEvent, CallClientError> {
        if self.status != CallStatus::Idle {
            return Err(CallClientError::Busy(self.status));
        }
        if to == self.user_id {
            return Err(CallClientError::SelfCall);
        }

        self.status = CallStatus::Calling;
        self.remote_user = Some(to.to_string());
        self.dialed_at = Some(now);
        debug!(to = %to, "Dialing");
        Ok(ClientEvent::call_initiate(self.user_id.clone(), to, offer))
    }

    /// Accept the ringing call with a local answer.
    ///
    /// Returns the offer to apply as remote description together with the
    /// `call:answer` event. Buffered candidates become ready.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is ringing.
    pub fn answer(&mut self, answer: Value) -> Result<(Value, ClientEvent), CallClientError> {
        if self.status != CallStatus::Ringing {
            return Err(CallClientError::NoIncomingCall);
        }
        let (Some(caller), Some(offer)) = (self.remote_user.clone(), self.incoming_offer.take())
        else {
            return Err(CallClientError::NoIncomingCall);
        };

        self.apply_remote_description();
        self.status = CallStatus::Connected;
        Ok((offer, ClientEvent::call_answer(caller, answer)))
    }

    /// Decline the ringing call.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is ringing.
    pub fn reject(&mut self) -> Result<ClientEvent, CallClientError> {
        if self.status != CallStatus::Ringing {
            return Err(CallClientError::NoIncomingCall);
        }
        let caller = self.remote_user.clone().ok_or(CallClientError::NoIncomingCall)?;
        self.reset();
        Ok(ClientEvent::call_reject(caller))
    }

    /// Hang up locally. Returns `call:end` if there was a call.
    pub fn hang_up(&mut self) -> Option<ClientEvent> {
        let peer = self.remote_user.clone()?;
        self.reset();
        Some(ClientEvent::call_end(peer))
    }

    /// Wrap a locally gathered candidate for the peer.
    pub fn local_candidate(&self, candidate: Value) -> Option<ClientEvent> {
        let peer = self.remote_user.as_ref()?;
        Some(ClientEvent::call_ice_candidate(peer.clone(), candidate))
    }

    /// Give up on an unanswered outgoing call.
    pub fn poll(&mut self, now: Instant) -> Option<ClientEvent> {
        let dialed_at = self.dialed_at?;
        if self.status != CallStatus::Calling
            || now.saturating_duration_since(dialed_at) < self.dial_timeout
        {
            return None;
        }
        debug!("Dial timed out");
        self.hang_up()
    }

    /// Apply a server event.
    pub fn on_event(&mut self, event: &ServerEvent) -> CallUpdate {
        match event {
            ServerEvent::CallIncoming(incoming) => {
                if self.status != CallStatus::Idle {
                    // The server refuses the second call before it gets here
                    return CallUpdate::None;
                }
                self.status = CallStatus::Ringing;
                self.remote_user = Some(incoming.from.clone());
                self.incoming_offer = Some(incoming.offer.clone());
                CallUpdate::Incoming {
                    from: incoming.from.clone(),
                    ack: ClientEvent::call_ringing(incoming.from.clone()),
                }
            }

            ServerEvent::CallRinging(ringing) if self.is_peer(&ringing.from) => {
                if self.status != CallStatus::Calling {
                    return CallUpdate::None;
                }
                self.peer_ringing = true;
                CallUpdate::PeerRinging
            }

            ServerEvent::CallAnswered(answered) if self.is_peer(&answered.from) => {
                if self.status != CallStatus::Calling {
                    return CallUpdate::None;
                }
                self.apply_remote_description();
                self.status = CallStatus::Connected;
                self.dialed_at = None;
                CallUpdate::Answered {
                    answer: answered.answer.clone(),
                }
            }

            ServerEvent::CallIceCandidate(ice) if self.is_peer(&ice.from) => {
                if self.has_remote_description {
                    self.ready_candidates.push(ice.candidate.clone());
                    CallUpdate::Candidate
                } else {
                    self.pending_candidates.push(ice.candidate.clone());
                    CallUpdate::None
                }
            }

            ServerEvent::CallEnded(ended) if self.is_peer(&ended.from) => {
                self.reset();
                CallUpdate::Closed { reason: "ended" }
            }

            ServerEvent::CallRejected(rejected) if self.is_peer(&rejected.from) => {
                self.reset();
                CallUpdate::Closed { reason: "rejected" }
            }

            ServerEvent::CallBusy(peer) if self.is_peer(&peer.to) => {
                self.reset();
                CallUpdate::Closed { reason: "busy" }
            }

            ServerEvent::CallUnavailable(peer) if self.is_peer(&peer.to) => {
                self.reset();
                CallUpdate::Closed { reason: "unavailable" }
            }

            _ => CallUpdate::None,
        }
    }

    fn is_peer(&self, user_id: &str) -> bool {
        self.remote_user.as_deref() == Some(user_id)
    }

    fn apply_remote_description(&mut self) {
        self.has_remote_description = true;
        self.ready_candidates.append(&mut self.pending_candidates);
    }

    fn reset(&mut self) {
        let user_id = std::mem::take(&mut self.user_id);
        let dial_timeout = self.dial_timeout;
        *self = Self::new(user_id).with_dial_timeout(dial_timeout);
    }
}
