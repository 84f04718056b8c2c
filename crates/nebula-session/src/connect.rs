//! Remote connection lifecycle: non-blocking connect with a deadline, and the
//! rate-limited liveness probe used once the connection is up.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::SessionError;
use crate::socket::GameSocket;

/// How long a connect attempt may take before it is abandoned.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Silence after which the connection starts being probed.
pub const DEFAULT_LIVENESS_THRESHOLD: Duration = Duration::from_secs(30);

/// Minimum time between two liveness probes.
pub const LIVENESS_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of a remote connection.
#[derive(Debug, Default)]
pub enum ConnectState {
    /// No attempt has been made.
    #[default]
    Idle,
    /// A non-blocking connect is outstanding.
    Connecting(ConnectAttempt),
    /// Login was sent; packets are flowing.
    Connected,
    /// The connection ended. Terminal.
    Disconnected,
}

impl ConnectState {
    /// Whether a connect attempt is outstanding.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting(_))
    }

    /// Whether the connection is established.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Result of polling an outstanding connect.
#[derive(Debug)]
pub enum ConnectPoll {
    /// Still waiting; `progress` is the elapsed fraction of the timeout.
    Pending {
        /// In `0.0..=1.0`.
        progress: f32,
    },
    /// The connect completed and the socket has been switched to blocking mode.
    Connected,
    /// The attempt failed or timed out.
    Failed(SessionError),
}

/// An outstanding non-blocking connect.
#[derive(Debug, Clone, Copy)]
pub struct ConnectAttempt {
    started_at: Instant,
    deadline: Instant,
    timeout: Duration,
}

impl ConnectAttempt {
    /// Begin an attempt at `now` that expires after `timeout`.
    pub fn start(now: Instant, timeout: Duration) -> Self {
        Self {
            started_at: now,
            deadline: now + timeout,
            timeout,
        }
    }

    /// When the attempt began.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// When the attempt times out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Elapsed fraction of the timeout, clamped to `0.0..=1.0`.
    pub fn progress(&self, now: Instant) -> f32 {
        if self.timeout.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started_at);
        (elapsed.as_secs_f32() / self.timeout.as_secs_f32()).clamp(0.0, 1.0)
    }

    /// Check the socket once.
    ///
    /// A pending socket error fails the attempt. Writability means the connect
    /// completed; the socket is then put in blocking mode. Otherwise the attempt
    /// times out once `now` is past the deadline.
    pub fn poll(&self, socket: &mut dyn GameSocket, endpoint: &str, now: Instant) -> ConnectPoll {
        let failed = |source| {
            ConnectPoll::Failed(SessionError::ConnectFailed {
                endpoint: endpoint.to_string(),
                source,
            })
        };

        match socket.take_error() {
            Ok(None) => {}
            Ok(Some(err)) | Err(err) => return failed(err),
        }

        match socket.poll_connected() {
            Ok(true) => {
                if let Err(err) = socket.set_blocking(true) {
                    return failed(err);
                }
                debug!(endpoint, elapsed = ?now.saturating_duration_since(self.started_at), "connect completed");
                ConnectPoll::Connected
            }
            Ok(false) if now > self.deadline => ConnectPoll::Failed(SessionError::ConnectTimedOut {
                endpoint: endpoint.to_string(),
            }),
            Ok(false) => ConnectPoll::Pending {
                progress: self.progress(now),
            },
            Err(err) => failed(err),
        }
    }
}

/// Accumulates tick intervals so the liveness probe runs at most once per
/// [`LIVENESS_PROBE_INTERVAL`].
#[derive(Debug, Clone, Copy)]
pub struct LivenessCounter {
    accumulated: Duration,
    interval: Duration,
}

impl Default for LivenessCounter {
    fn default() -> Self {
        Self::new(LIVENESS_PROBE_INTERVAL)
    }
}

impl LivenessCounter {
    /// A counter that fires every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            accumulated: Duration::ZERO,
            interval,
        }
    }

    /// Add `elapsed`. Returns true, and resets to zero, once a full interval has built up.
    pub fn accumulate(&mut self, elapsed: Duration) -> bool {
        self.accumulated += elapsed;
        if self.accumulated < self.interval {
            return false;
        }
        self.accumulated = Duration::ZERO;
        true
    }

    /// Time accumulated since the last probe.
    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }

    /// Start over.
    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
    }
}

/// Probe a quiet connection. Returns true if the peer should be considered gone:
/// an earlier write failed, the socket errors when queried, or it is readable
/// with nothing to read (orderly close).
pub fn peer_is_gone(socket: &mut dyn GameSocket, write_failed: bool) -> bool {
    if write_failed {
        warn!("liveness: earlier write failed");
        return true;
    }

    let available = match socket.bytes_available() {
        Ok(n) => n,
        Err(err) => {
            warn!(error = %err, "liveness: querying available bytes failed");
            return true;
        }
    };
    let readable = match socket.poll_readable() {
        Ok(readable) => readable,
        Err(err) => {
            warn!(error = %err, "liveness: polling socket failed");
            return true;
        }
    };

    if available == 0 && readable {
        warn!("liveness: peer closed the connection");
        return true;
    }
    false
}
