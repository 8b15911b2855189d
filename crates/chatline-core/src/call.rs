//! Call signaling state machine.
//!
//! The server never touches media. It relays WebRTC session descriptions and
//! ICE candidates between exactly two users, and tracks each call attempt
//! explicitly so that out-of-order, stale or conflicting signals can be
//! refused instead of being forwarded blindly.
//!
//! ```text
//!            initiate          ringing           answer
//!   Idle ─────────────▶ Offering ──────▶ Ringing ──────▶ Connected
//!    ▲                     │  │             │                │
//!    │                     │  └── answer ───┼───────────────▶│
//!    │     reject / end / timeout / disconnect                │
//!    └─────────────────────┴─────────────────┴───── end ──────┘
//! ```
//!
//! A user takes part in at most one call at a time. Every destination is
//! resolved through the [`SessionRegistry`] at the moment of relay, so a
//! signal to a user who has gone offline is dropped rather than delivered to
//! a dead connection.

use crate::delivery::Delivery;
use crate::session::SessionRegistry;
use chatline_protocol::{
    CallAnswered, CallFrom, CallPeer, EndReason, IceCandidate, IncomingCall, ServerEvent, UserId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Identifier of one call attempt.
pub type CallId = u64;

/// Phase of a call between two users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallPhase {
    /// No call. Both the initial and the resting state.
    Idle,
    /// The offer reached the callee.
    Offering,
    /// The callee acknowledged and is being rung.
    Ringing,
    /// The callee answered; media flows peer to peer.
    Connected,
    /// Torn down. Sessions are forgotten as soon as they get here.
    Ended,
}

impl CallPhase {
    /// Whether the call has not been answered yet.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, CallPhase::Offering | CallPhase::Ringing)
    }

    /// Whether ICE candidates may flow.
    #[must_use]
    pub fn accepts_candidates(self) -> bool {
        matches!(
            self,
            CallPhase::Offering | CallPhase::Ringing | CallPhase::Connected
        )
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallPhase::Idle => "idle",
            CallPhase::Offering => "offering",
            CallPhase::Ringing => "ringing",
            CallPhase::Connected => "connected",
            CallPhase::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Call signaling errors. All of them mean the signal was dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    /// A user tried to call themselves.
    #[error("Cannot call yourself")]
    SelfCall,

    /// The offer or answer was missing.
    #[error("Missing session description")]
    MissingDescription,

    /// The ICE candidate was missing.
    #[error("Missing ICE candidate")]
    MissingCandidate,

    /// No live call between the two users.
    #[error("No active call between {0} and {1}")]
    NoActiveCall(UserId, UserId),

    /// Only the callee may send this signal.
    #[error("Only the callee can {0}")]
    NotCallee(&'static str),

    /// The signal does not apply in the call's current phase.
    #[error("Cannot {signal} a call that is {phase}")]
    InvalidTransition {
        signal: &'static str,
        phase: CallPhase,
    },
}

/// Policy knobs for call signaling.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    /// End calls nobody answered within this long. `None` disables.
    pub ring_timeout: Option<Duration>,
    /// Tell the caller when the callee has no live session.
    pub notify_unreachable: bool,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            ring_timeout: Some(Duration::from_secs(30)),
            notify_unreachable: false,
        }
    }
}

/// One call attempt between two users.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub id: CallId,
    pub initiator: UserId,
    pub recipient: UserId,
    pub phase: CallPhase,
    /// When the offer was relayed.
    pub started_at: Instant,
    /// When the callee answered.
    pub connected_at: Option<Instant>,
}

impl CallSession {
    /// The other participant, if `user_id` takes part in this call.
    #[must_use]
    pub fn peer_of(&self, user_id: &str) -> Option<&UserId> {
        if self.initiator == user_id {
            Some(&self.recipient)
        } else if self.recipient == user_id {
            Some(&self.initiator)
        } else {
            None
        }
    }
}

/// Tracks every in-progress call and relays its signals.
#[derive(Debug, Default)]
pub struct CallSignaling {
    sessions: HashMap<CallId, CallSession>,
    /// participant -> the call they are in
    by_user: HashMap<UserId, CallId>,
    next_id: CallId,
    policy: CallPolicy,
}

impl CallSignaling {
    /// Create a state machine with the given policy.
    #[must_use]
    pub fn new(policy: CallPolicy) -> Self {
        Self {
            sessions: HashMap::new(),
            by_user: HashMap::new(),
            next_id: 1,
            policy,
        }
    }

    /// The call policy in force.
    #[must_use]
    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    /// Number of calls in progress.
    #[must_use]
    pub fn active_calls(&self) -> usize {
        self.sessions.len()
    }

    /// The call a user takes part in.
    #[must_use]
    pub fn session_of(&self, user_id: &str) -> Option<&CallSession> {
        self.by_user
            .get(user_id)
            .and_then(|id| self.sessions.get(id))
    }

    /// The phase of the call between two users.
    #[must_use]
    pub fn phase_between(&self, a: &str, b: &str) -> CallPhase {
        match self.session_of(a) {
            Some(session) if session.peer_of(a).is_some_and(|peer| peer == b) => session.phase,
            _ => CallPhase::Idle,
        }
    }

    fn call_between(&self, from: &str, to: &str) -> Result<CallId, CallError> {
        match self.session_of(from) {
            Some(session) if session.peer_of(from).is_some_and(|peer| peer == to) => {
                Ok(session.id)
            }
            _ => Err(CallError::NoActiveCall(from.to_string(), to.to_string())),
        }
    }

    /// Look up the call between `from` and `to` where `from` is the callee.
    fn incoming_between(
        &self,
        from: &str,
        to: &str,
        signal: &'static str,
    ) -> Result<CallId, CallError> {
        let id = self.call_between(from, to)?;
        let session = &self.sessions[&id];
        if session.recipient != from {
            return Err(CallError::NotCallee(signal));
        }
        if !session.phase.is_pending() {
            return Err(CallError::InvalidTransition {
                signal,
                phase: session.phase,
            });
        }
        Ok(id)
    }

    fn finish(&mut self, id: CallId) -> Option<CallSession> {
        let mut session = self.sessions.remove(&id)?;
        for user in [&session.initiator, &session.recipient] {
            if self.by_user.get(user) == Some(&id) {
                self.by_user.remove(user);
            }
        }
        debug!(
            call = id,
            initiator = %session.initiator,
            recipient = %session.recipient,
            from = %session.phase,
            "Call ended"
        );
        session.phase = CallPhase::Ended;
        Some(session)
    }

    /// Offer a call from `from` to `to`.
    ///
    /// An unreachable callee creates no state. A call where either party is
    /// already busy is refused and the existing call is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error for a self call or a missing offer.
    pub fn initiate(
        &mut self,
        registry: &SessionRegistry,
        from: &str,
        to: &str,
        offer: Value,
        now: Instant,
    ) -> Result<Vec<Delivery>, CallError> {
        if from == to {
            return Err(CallError::SelfCall);
        }
        if offer.is_null() {
            return Err(CallError::MissingDescription);
        }

        let Some(callee) = registry.resolve(to) else {
            info!(from = %from, to = %to, "Call target not online");
            if !self.policy.notify_unreachable {
                return Ok(Vec::new());
            }
            let notice = ServerEvent::CallUnavailable(CallPeer { to: to.to_string() });
            return Ok(registry.deliver(from, notice).into_iter().collect());
        };

        if self.by_user.contains_key(from) || self.by_user.contains_key(to) {
            info!(from = %from, to = %to, "Call refused, party busy");
            let notice = ServerEvent::CallBusy(CallPeer { to: to.to_string() });
            return Ok(registry.deliver(from, notice).into_iter().collect());
        }

        let id = self.next_id;
        self.next_id += 1;
        self.sessions.insert(
            id,
            CallSession {
                id,
                initiator: from.to_string(),
                recipient: to.to_string(),
                phase: CallPhase::Offering,
                started_at: now,
                connected_at: None,
            },
        );
        self.by_user.insert(from.to_string(), id);
        self.by_user.insert(to.to_string(), id);

        debug!(call = id, from = %from, to = %to, "Call offered");
        Ok(vec![Delivery::new(
            callee.clone(),
            ServerEvent::CallIncoming(IncomingCall {
                from: from.to_string(),
                offer,
            }),
        )])
    }

    /// The callee reports that it is ringing.
    ///
    /// # Errors
    ///
    /// Returns an error unless `from` is the callee of a call in `Offering`.
    pub fn ringing(
        &mut self,
        registry: &SessionRegistry,
        from: &str,
        to: &str,
    ) -> Result<Vec<Delivery>, CallError> {
        let id = self.incoming_between(from, to, "ring")?;
        if let Some(session) = self.sessions.get_mut(&id) {
            if session.phase != CallPhase::Offering {
                return Err(CallError::InvalidTransition {
                    signal: "ring",
                    phase: session.phase,
                });
            }
            session.phase = CallPhase::Ringing;
        }

        debug!(call = id, "Call ringing");
        let notice = ServerEvent::CallRinging(CallFrom {
            from: from.to_string(),
        });
        Ok(registry.deliver(to, notice).into_iter().collect())
    }

    /// The callee accepts the call.
    ///
    /// If the caller has gone away in the meantime the answer is dropped and
    /// the call is forgotten.
    ///
    /// # Errors
    ///
    /// Returns an error unless `from` is the callee of a pending call with
    /// `to`, or if the answer is missing.
    pub fn answer(
        &mut self,
        registry: &SessionRegistry,
        from: &str,
        to: &str,
        answer: Value,
        now: Instant,
    ) -> Result<Vec<Delivery>, CallError> {
        if answer.is_null() {
            return Err(CallError::MissingDescription);
        }
        let id = self.incoming_between(from, to, "answer")?;

        let answered = ServerEvent::CallAnswered(CallAnswered {
            from: from.to_string(),
            answer,
        });
        let Some(delivery) = registry.deliver(to, answered) else {
            self.finish(id);
            return Ok(Vec::new());
        };

        if let Some(session) = self.sessions.get_mut(&id) {
            session.phase = CallPhase::Connected;
            session.connected_at = Some(now);
        }
        debug!(call = id, "Call connected");
        Ok(vec![delivery])
    }

    /// Relay an ICE candidate to the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no call between the two users or the
    /// candidate is missing.
    pub fn ice_candidate(
        &self,
        registry: &SessionRegistry,
        from: &str,
        to: &str,
        candidate: Value,
    ) -> Result<Vec<Delivery>, CallError> {
        if candidate.is_null() {
            return Err(CallError::MissingCandidate);
        }
        let id = self.call_between(from, to)?;
        let phase = self.sessions[&id].phase;
        if !phase.accepts_candidates() {
            return Err(CallError::InvalidTransition {
                signal: "trickle",
                phase,
            });
        }

        let relayed = ServerEvent::CallIceCandidate(IceCandidate {
            from: from.to_string(),
            candidate,
        });
        Ok(registry.deliver(to, relayed).into_iter().collect())
    }

    /// Either party hangs up.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no call between the two users, e.g. a
    /// hang-up echoed back after the call already ended.
    pub fn end(
        &mut self,
        registry: &SessionRegistry,
        from: &str,
        to: &str,
    ) -> Result<Vec<Delivery>, CallError> {
        let id = self.call_between(from, to)?;
        self.finish(id);
        Ok(registry
            .deliver(to, ServerEvent::call_ended(from, EndReason::Hangup))
            .into_iter()
            .collect())
    }

    /// The callee declines the call.
    ///
    /// # Errors
    ///
    /// Returns an error unless `from` is the callee of a pending call with
    /// `to`.
    pub fn reject(
        &mut self,
        registry: &SessionRegistry,
        from: &str,
        to: &str,
    ) -> Result<Vec<Delivery>, CallError> {
        let id = self.incoming_between(from, to, "reject")?;
        self.finish(id);
        let rejected = ServerEvent::CallRejected(CallFrom {
            from: from.to_string(),
        });
        Ok(registry.deliver(to, rejected).into_iter().collect())
    }

    /// End whatever call `user_id` is in because its session went away.
    pub fn drop_user(&mut self, registry: &SessionRegistry, user_id: &str) -> Vec<Delivery> {
        let Some(&id) = self.by_user.get(user_id) else {
            return Vec::new();
        };
        let Some(session) = self.finish(id) else {
            return Vec::new();
        };

        info!(call = id, user = %user_id, "Call ended by disconnect");
        session
            .peer_of(user_id)
            .and_then(|peer| {
                registry.deliver(peer, ServerEvent::call_ended(user_id, EndReason::Disconnected))
            })
            .into_iter()
            .collect()
    }

    /// End every unanswered call older than the ring timeout.
    pub fn expire(&mut self, registry: &SessionRegistry, now: Instant) -> Vec<Delivery> {
        let Some(timeout) = self.policy.ring_timeout else {
            return Vec::new();
        };

        let expired: Vec<CallId> = self
            .sessions
            .values()
            .filter(|s| {
                s.phase.is_pending() && now.saturating_duration_since(s.started_at) >= timeout
            })
            .map(|s| s.id)
            .collect();

        let mut deliveries = Vec::new();
        for id in expired {
            let Some(session) = self.finish(id) else {
                continue;
            };
            info!(
                call = id,
                initiator = %session.initiator,
                recipient = %session.recipient,
                "Call timed out"
            );
            deliveries.extend(registry.deliver(
                &session.initiator,
                ServerEvent::call_ended(&session.recipient, EndReason::Timeout),
            ));
            deliveries.extend(registry.deliver(
                &session.recipient,
                ServerEvent::call_ended(&session.initiator, EndReason::Timeout),
            ));
        }
        deliveries
    }
}
