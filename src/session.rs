//! State that outlives a single command: the status words the host can query and the playback
//! settings a vector stream adjusts as it runs.
use crate::config::RetryPolicy;
use crate::protocol::StatusReport;

/// OR-ed into the status word when the bulk IN endpoint could not be configured.
pub const STATUS_IN_ENDPOINT_FAILED: u32 = 0xDEAD_0000;
/// OR-ed into the status word when the bulk OUT endpoint could not be configured.
pub const STATUS_OUT_ENDPOINT_FAILED: u32 = 0x0000_DEAD;

#[derive(Clone, Debug)]
pub struct Session {
    /// Identity register from the most recent scan.
    pub idcode: u32,
    /// Result of the last bulk operation (0 for success).
    pub status: u32,
    /// Verify scans that exhausted their retries.
    pub failures: u32,
    /// Busy-wait before each data scan, set by the vector stream.
    pub idle_us: u32,
    retries: u8,
    policy: RetryPolicy,
}

impl Session {
    pub fn new(policy: RetryPolicy) -> Self {
        Session {
            idcode: 0,
            status: 0,
            failures: 0,
            idle_us: 0,
            retries: policy.initial(),
            policy,
        }
    }

    /// Zero the status words and playback settings ahead of a bulk operation.
    pub fn begin_bulk(&mut self) {
        self.status = 0;
        self.failures = 0;
        self.idle_us = 0;
        self.retries = self.policy.initial();
    }

    /// Take a retry budget from the vector stream, if the policy allows it.
    pub fn set_retries(&mut self, retries: u8) {
        if let RetryPolicy::Stream { .. } = self.policy {
            self.retries = retries;
        }
    }

    /// Attempts a verifying scan gets.  Never less than one.
    pub fn attempts(&self) -> u8 {
        self.retries.max(1)
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            idcode: self.idcode,
            status: self.status,
            failures: self.failures,
        }
    }
}
