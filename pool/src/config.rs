//! Pool-wide tuning knobs, grounded on `ClientAssociationOptions`'s
//! builder shape.

use std::time::Duration;

use dicom_dictionary_std::uids;

/// Identifies a pool of connections to one peer, playing one AE-title
/// pair.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
}

impl PoolKey {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        calling_ae_title: impl Into<String>,
        called_ae_title: impl Into<String>,
    ) -> Self {
        PoolKey {
            host: host.into(),
            port,
            calling_ae_title: calling_ae_title.into(),
            called_ae_title: called_ae_title.into(),
        }
    }
}

/// Configuration shared by every connection a [`crate::ConnectionPool`]
/// opens for a given [`PoolKey`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub(crate) max_connections: usize,
    pub(crate) min_connections: usize,
    pub(crate) acquire_timeout: Duration,
    pub(crate) idle_timeout: Duration,
    pub(crate) health_check_interval: Duration,
    pub(crate) abstract_syntaxes: Vec<String>,
    pub(crate) max_pdu_length: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_connections: 8,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(60),
            abstract_syntaxes: vec![uids::VERIFICATION.to_string()],
            max_pdu_length: dcmnet_ul::pdu::DEFAULT_MAX_PDU,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_connections(mut self, value: usize) -> Self {
        self.max_connections = value;
        self
    }

    pub fn min_connections(mut self, value: usize) -> Self {
        self.min_connections = value;
        self
    }

    pub fn acquire_timeout(mut self, value: Duration) -> Self {
        self.acquire_timeout = value;
        self
    }

    pub fn idle_timeout(mut self, value: Duration) -> Self {
        self.idle_timeout = value;
        self
    }

    pub fn health_check_interval(mut self, value: Duration) -> Self {
        self.health_check_interval = value;
        self
    }

    /// Additional abstract syntaxes to propose on every new connection,
    /// alongside Verification (always included so health checks can
    /// run a C-ECHO).
    pub fn with_abstract_syntax(mut self, uid: impl Into<String>) -> Self {
        self.abstract_syntaxes.push(uid.into());
        self
    }

    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// The idle-sweep cadence used alongside `health_check_interval`,
    /// `min(60s, idle_timeout / 2)`.
    pub(crate) fn idle_sweep_interval(&self) -> Duration {
        std::cmp::min(Duration::from_secs(60), self.idle_timeout / 2)
    }
}
