use crate::txn::Protocol;

/// Store open parameters.
#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    /// Maximum keys per page; governs fanout and split points. Must be at
    /// least 4.
    pub degree: usize,
    /// Concurrency-control protocol.
    pub protocol: Protocol,
    /// Skip commit-time read validation in Silo-HV. Measurement toggle
    /// for the validation cost roofline, not a functional mode.
    pub no_read_validation: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            degree: 16,
            protocol: Protocol::Silo,
            no_read_validation: false,
        }
    }
}

impl StoreConfig {
    pub fn new(degree: usize, protocol: Protocol) -> Self {
        Self {
            degree,
            protocol,
            ..Self::default()
        }
    }
}
