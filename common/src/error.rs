//! エラー型定義
//!
//! 統一エラー型（thiserror使用）
//!
//! 各エラーは `code()` で数値コードを返す。ログやメトリクスで
//! エラー種別を機械的に区別するために使う。

use crate::types::ProbeKind;
use std::time::Duration;
use thiserror::Error;

/// Common layer error type
#[derive(Debug, Error)]
pub enum CommonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl CommonError {
    /// Numeric error code.
    pub fn code(&self) -> u16 {
        match self {
            Self::Config(_) => 1001,
            Self::Validation(_) => 1002,
        }
    }
}

/// Health probe error type
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Common layer error
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Listener could not be bound
    #[error("Failed to bind probe listener on {address}: {source}")]
    Bind {
        /// Address the unit tried to bind
        address: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Listener failed while serving or draining
    #[error("Probe {kind} server error: {source}")]
    Serve {
        /// Probe kind of the failing unit
        kind: ProbeKind,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Contributor registered against a disabled probe kind
    #[error("Healthcheck probe not enabled: {0}")]
    ProbeNotEnabled(ProbeKind),

    /// Shutdown requested on a unit that has already stopped
    #[error("Probe {0} is already stopped")]
    AlreadyStopped(ProbeKind),

    /// Aggregator started twice
    #[error("Probe listeners already started")]
    AlreadyStarted,

    /// Graceful drain did not finish in time
    #[error("Probe {kind} did not stop within {timeout:?}")]
    ShutdownTimeout {
        /// Probe kind of the unit
        kind: ProbeKind,
        /// Time waited for the drain
        timeout: Duration,
    },
}

impl ProbeError {
    /// Numeric error code.
    pub fn code(&self) -> u16 {
        match self {
            Self::Common(err) => err.code(),
            Self::Bind { .. } => 2001,
            Self::Serve { .. } => 2002,
            Self::ProbeNotEnabled(_) => 2003,
            Self::AlreadyStopped(_) => 2004,
            Self::AlreadyStarted => 2005,
            Self::ShutdownTimeout { .. } => 2006,
        }
    }

    /// Returns the probe kind if the error was caused by a disabled probe.
    pub fn not_enabled_kind(&self) -> Option<ProbeKind> {
        match self {
            Self::ProbeNotEnabled(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Message broker error type
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Connection to the broker is down
    #[error("Broker connection is disconnected")]
    Disconnected,

    /// Broker refused the request
    #[error("Broker rejected request: {0}")]
    Rejected(String),

    /// Subscription handle already closed
    #[error("Subscription is closed")]
    Closed,
}

impl BrokerError {
    /// Numeric error code.
    pub fn code(&self) -> u16 {
        match self {
            Self::Disconnected => 4001,
            Self::Rejected(_) => 4002,
            Self::Closed => 4003,
        }
    }
}

/// Subscription unit error type
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Common layer error
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Subscribe call failed
    #[error("Failed to subscribe to {subject} (queue group {queue_group}): {source}")]
    Subscribe {
        /// Subject name
        subject: String,
        /// Queue group name
        queue_group: String,
        /// Broker error
        #[source]
        source: BrokerError,
    },

    /// Unsubscribe call failed
    #[error("Failed to unsubscribe: {0}")]
    Unsubscribe(#[source] BrokerError),

    /// Broker connection is down at run time
    #[error("Broker connection is not established")]
    NotConnected,
}

impl SubscriptionError {
    /// Numeric error code.
    pub fn code(&self) -> u16 {
        match self {
            Self::Common(err) => err.code(),
            Self::Subscribe { .. } => 3001,
            Self::Unsubscribe(_) => 3002,
            Self::NotConnected => 3003,
        }
    }
}

/// Error type shared by every managed unit
#[derive(Debug, Error)]
pub enum UnitError {
    /// Common layer error
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Probe unit error
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Subscription unit error
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

impl UnitError {
    /// Numeric error code of the wrapped error.
    pub fn code(&self) -> u16 {
        match self {
            Self::Common(err) => err.code(),
            Self::Probe(err) => err.code(),
            Self::Subscription(err) => err.code(),
        }
    }
}
