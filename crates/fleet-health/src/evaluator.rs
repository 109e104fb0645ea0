//! Health evaluation over reported health bits.
//!
//! A node reports conditions such as `Ready` or `DiskPressure` as booleans.
//! The policy compares them against a table of expected values.

use std::collections::BTreeMap;

use fleet_core::config::HealthConfig;
use fleet_state::HealthStatus;
use tracing::debug;

/// Expected values of the well-known health bits.
pub fn default_expected_bits() -> BTreeMap<String, bool> {
    [
        ("DiskPressure", false),
        ("MemoryPressure", false),
        ("NetworkUnavailable", false),
        ("PIDPressure", false),
        ("Ready", true),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// How reported health bits are judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthPolicy {
    pub expected: BTreeMap<String, bool>,
    /// When set, an expected bit the node did not report counts as a failure.
    pub fail_on_missing_expected: bool,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            expected: default_expected_bits(),
            fail_on_missing_expected: false,
        }
    }
}

impl HealthPolicy {
    pub fn from_config(config: &HealthConfig) -> Self {
        Self {
            expected: config.expected.clone().unwrap_or_else(default_expected_bits),
            fail_on_missing_expected: config.fail_on_missing_expected,
        }
    }

    pub fn with_fail_on_missing_expected(mut self, fail: bool) -> Self {
        self.fail_on_missing_expected = fail;
        self
    }

    /// True iff the bits are non-empty and every expected bit matches.
    ///
    /// Bits outside the expected table are ignored.
    pub fn is_healthy(&self, bits: &BTreeMap<String, bool>) -> bool {
        if bits.is_empty() {
            return false;
        }
        for (key, want) in &self.expected {
            match bits.get(key) {
                Some(got) if got == want => {}
                Some(got) => {
                    debug!(bit = %key, expected = want, reported = got, "health bit mismatch");
                    return false;
                }
                None if self.fail_on_missing_expected => {
                    debug!(bit = %key, "expected health bit missing");
                    return false;
                }
                None => {}
            }
        }
        true
    }

    /// Tri-state verdict; no bits at all is `Unknown`.
    pub fn evaluate(&self, bits: &BTreeMap<String, bool>) -> HealthStatus {
        if bits.is_empty() {
            HealthStatus::Unknown
        } else if self.is_healthy(bits) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}
