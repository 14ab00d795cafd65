//! ---
//! dr_section: "02-broker-interfaces"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Broker capability traits and SEMP client."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use kits_model::ReplicationRole;
use kits_resilience::Retryable;
use thiserror::Error;

/// Errors raised while talking to a broker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Connection-level failure: refused, reset, resolution failure or timeout.
    #[error("transport failure for {url}: {reason}")]
    Transport {
        /// Request URL.
        url: String,
        /// Underlying error.
        reason: String,
    },
    /// The broker answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// The response body could not be decoded.
    #[error("failed to decode response from {url}: {reason}")]
    Decode {
        /// Request URL.
        url: String,
        /// Parser error.
        reason: String,
    },
    /// The request could not be built.
    #[error("invalid request: {0}")]
    Request(String),
    /// A VPN does not hold the expected role.
    #[error("vpn {vpn} not in {role} role on {host}")]
    RoleMismatch {
        /// VPN name.
        vpn: String,
        /// Expected role.
        role: ReplicationRole,
        /// Broker host queried.
        host: String,
    },
    /// Replication data is still flowing for a VPN.
    #[error("replication still in progress for vpn {vpn} on {host} ({queues} queue(s) transmitting)")]
    ReplicationInProgress {
        /// VPN name.
        vpn: String,
        /// Broker host queried.
        host: String,
        /// Number of replication queues with traffic.
        queues: usize,
    },
}

impl Retryable for BrokerError {
    fn is_retryable(&self) -> bool {
        match self {
            BrokerError::Transport { .. } => true,
            BrokerError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            BrokerError::Decode { .. } | BrokerError::Request(_) => false,
            BrokerError::RoleMismatch { .. } | BrokerError::ReplicationInProgress { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_separates_transient_from_permanent() {
        let transport = BrokerError::Transport {
            url: "http://a1:8080/SEMP".into(),
            reason: "connection refused".into(),
        };
        assert!(transport.is_retryable());
        let unavailable = BrokerError::Status {
            url: "u".into(),
            status: 503,
        };
        assert!(unavailable.is_retryable());
        let unauthorized = BrokerError::Status {
            url: "u".into(),
            status: 401,
        };
        assert!(!unauthorized.is_retryable());
        let decode = BrokerError::Decode {
            url: "u".into(),
            reason: "eof".into(),
        };
        assert!(!decode.is_retryable());
        assert!(!BrokerError::Request("bad url".into()).is_retryable());
        let backlog = BrokerError::ReplicationInProgress {
            vpn: "orders".into(),
            host: "a1".into(),
            queues: 1,
        };
        assert!(backlog.is_retryable());
    }
}
