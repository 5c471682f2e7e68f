//! Connection handle, lifecycle state and hub options

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::websocket::OutboundMessage;

/// Opaque connection handle identity
pub type ConnectionId = Uuid;

/// WebSocket close codes sent by the transport
pub mod close_code {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Server is going away (shutdown)
    pub const GOING_AWAY: u16 = 1001;
    /// Path user id does not match the authenticated identity
    pub const AUTHORIZATION_MISMATCH: u16 = 1008;
    /// Internal failure on the server side
    pub const INTERNAL_ERROR: u16 = 1011;
    /// Slow consumer or connection limit, client may retry later
    pub const TRY_AGAIN_LATER: u16 = 1013;
    /// No liveness signal within the connection timeout
    pub const STALE: u16 = 4000;
}

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Lifecycle state of a connection: `Connecting -> Open -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_CONNECTING => Self::Connecting,
            STATE_OPEN => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Why a connection transitioned to `Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Client sent a close frame or the stream ended
    ClientClosed,
    /// Reading from or writing to the transport failed
    TransportError,
    /// Claimed identity differs from the authenticated one
    AuthorizationMismatch,
    /// A connection limit was hit at admission
    LimitExceeded,
    /// Outbound queue overflowed under the disconnect policy
    SlowConsumer,
    /// No liveness signal within the connection timeout
    Stale,
    /// Server shutdown
    Shutdown,
    /// Explicit administrative disconnect
    Admin,
}

impl CloseReason {
    pub fn close_code(self) -> u16 {
        match self {
            Self::ClientClosed | Self::Admin => close_code::NORMAL,
            Self::TransportError => close_code::INTERNAL_ERROR,
            Self::AuthorizationMismatch => close_code::AUTHORIZATION_MISMATCH,
            Self::LimitExceeded | Self::SlowConsumer => close_code::TRY_AGAIN_LATER,
            Self::Stale => close_code::STALE,
            Self::Shutdown => close_code::GOING_AWAY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client closed",
            Self::TransportError => "transport error",
            Self::AuthorizationMismatch => "authorization mismatch",
            Self::LimitExceeded => "connection limit exceeded",
            Self::SlowConsumer => "slow consumer",
            Self::Stale => "connection timed out",
            Self::Shutdown => "server shutting down",
            Self::Admin => "disconnected by server",
        }
    }
}

/// What to do when a connection's outbound queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Force-disconnect the slow consumer
    #[default]
    Disconnect,
    /// Drop the message for that connection only
    DropNewest,
}

/// Error returned by a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Outbound queue is at capacity
    Full,
    /// Connection is closed or its transport is gone
    Closed,
}

/// Handle for a single client connection.
///
/// The transport owns the socket and the receiving end of the outbound queue;
/// the hub keeps `Arc<Connection>` references for routing only.
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
    state: AtomicU8,
    sender: mpsc::Sender<OutboundMessage>,
    /// Last liveness signal (Unix millis)
    last_activity: AtomicI64,
    close_reason: OnceLock<CloseReason>,
    close_signal: Notify,
}

impl Connection {
    pub(crate) fn new(user_id: String, sender: mpsc::Sender<OutboundMessage>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            connected_at: now,
            state: AtomicU8::new(STATE_CONNECTING),
            sender,
            last_activity: AtomicI64::new(now.timestamp_millis()),
            close_reason: OnceLock::new(),
            close_signal: Notify::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// `Connecting -> Open`. Fails if the connection already left `Connecting`.
    pub(crate) fn open(&self) -> bool {
        self.state
            .compare_exchange(STATE_CONNECTING, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Transition to `Closed`. Only the first caller wins and records the reason.
    pub(crate) fn close(&self, reason: CloseReason) -> bool {
        if self.state.swap(STATE_CLOSED, Ordering::AcqRel) == STATE_CLOSED {
            return false;
        }
        let _ = self.close_reason.set(reason);
        true
    }

    /// Wake everything waiting in [`Connection::closed`]
    pub(crate) fn signal_closed(&self) {
        self.close_signal.notify_waiters();
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    /// Resolves once the connection's state is `Closed`.
    ///
    /// The state flips before registry and index cleanup finish, so callers
    /// must not assume the hub no longer lists the connection.
    pub async fn closed(&self) {
        let notified = self.close_signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.state() == ConnectionState::Closed {
            return;
        }
        notified.await;
    }

    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity.load(Ordering::Relaxed))
            .unwrap_or(self.connected_at)
    }

    /// Time since the last liveness signal
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_activity())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Hand a message to the outbound queue without waiting for capacity
    pub(crate) fn try_enqueue(&self, message: OutboundMessage) -> Result<(), EnqueueError> {
        if self.state() == ConnectionState::Closed {
            return Err(EnqueueError::Closed);
        }
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .finish()
    }
}

/// A connection accepted by the hub together with its outbound queue
#[derive(Debug)]
pub struct Admission {
    pub connection: Arc<Connection>,
    pub outbound: mpsc::Receiver<OutboundMessage>,
}

/// Errors raised by hub operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("claimed user {claimed} does not match authenticated user {authenticated}")]
    AuthorizationMismatch {
        claimed: String,
        authenticated: String,
    },

    #[error("total connection limit exceeded ({current}/{max})")]
    ConnectionLimit { current: usize, max: usize },

    #[error("user {user_id} connection limit exceeded ({current}/{max})")]
    UserConnectionLimit {
        user_id: String,
        current: usize,
        max: usize,
    },

    #[error("subscription limit exceeded ({current}/{max})")]
    SubscriptionLimit { current: usize, max: usize },

    #[error("connection {0} is not open")]
    NotOpen(ConnectionId),
}

impl HubError {
    /// Close reason used when this error rejects a connection
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::AuthorizationMismatch { .. } => CloseReason::AuthorizationMismatch,
            Self::ConnectionLimit { .. } | Self::UserConnectionLimit { .. } => {
                CloseReason::LimitExceeded
            }
            Self::SubscriptionLimit { .. } | Self::NotOpen(_) => CloseReason::Admin,
        }
    }
}

/// Limits for connection management
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_connections: usize,
    pub max_connections_per_user: usize,
    pub max_subscriptions_per_connection: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_connections_per_user: 16,
            max_subscriptions_per_connection: 64,
        }
    }
}

/// Runtime options for the hub
#[derive(Debug, Clone, Copy)]
pub struct HubOptions {
    pub limits: ConnectionLimits,
    /// Capacity of each connection's outbound queue
    pub outbound_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            limits: ConnectionLimits::default(),
            outbound_queue_capacity: 64,
            overflow_policy: OverflowPolicy::Disconnect,
        }
    }
}
