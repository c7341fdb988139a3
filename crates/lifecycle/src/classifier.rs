//! Maps provider error output to a failure class.
//!
//! Providers report quota and capacity problems as free text on stderr, so
//! classification is substring matching against per-provider marker tables.

use crate::error::{LifecycleError, QuotaKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Quota,
    InsufficientCapacity,
    /// Throttling or eventual-consistency lag; worth another attempt
    Transient,
    Unclassified,
}

const GCP_QUOTA: &[&str] = &[
    "Quota exceeded",
    "QUOTA_EXCEEDED",
    "Insufficient regional quota",
    "Machine type temporarily unavailable",
];
const GCP_CAPACITY: &[&str] = &[
    "ZONE_RESOURCE_POOL_EXHAUSTED",
    "does not have enough resources available",
];
const GCP_TRANSIENT: &[&str] = &["rateLimitExceeded", "RESOURCE_NOT_READY", "try again"];

const AWS_QUOTA: &[&str] = &[
    "The maximum number of VPCs has been reached",
    "VcpuLimitExceeded",
    "InstanceLimitExceeded",
];
const AWS_CAPACITY: &[&str] = &["InsufficientInstanceCapacity", "InsufficientCapacity"];
const AWS_TRANSIENT: &[&str] = &["RequestLimitExceeded", "Throttling", "InternalError"];

const AZURE_QUOTA: &[&str] = &["QuotaExceeded"];
const AZURE_CAPACITY: &[&str] = &["SkuNotAvailable", "AllocationFailed", "ZonalAllocationFailed"];
const AZURE_TRANSIENT: &[&str] = &["TooManyRequests", "RetryableError"];

const GENERIC_QUOTA: &[&str] = &["quota exceeded", "Quota exceeded", "QuotaExceeded"];
const GENERIC_CAPACITY: &[&str] = &["insufficient capacity", "InsufficientCapacity"];
const GENERIC_TRANSIENT: &[&str] = &["rate limit", "temporarily unavailable", "try again"];

#[derive(Debug, Clone, Default)]
pub struct FailureClassifier {
    quota: Vec<String>,
    capacity: Vec<String>,
    transient: Vec<String>,
}

fn owned(markers: &[&str]) -> Vec<String> {
    markers.iter().map(|m| (*m).to_string()).collect()
}

impl FailureClassifier {
    /// Built-in markers for `gcp`, `aws` and `azure`; anything else gets a
    /// generic table.
    pub fn for_provider(cloud: &str) -> Self {
        let (quota, capacity, transient) = match cloud.to_ascii_lowercase().as_str() {
            "gcp" | "google" => (GCP_QUOTA, GCP_CAPACITY, GCP_TRANSIENT),
            "aws" => (AWS_QUOTA, AWS_CAPACITY, AWS_TRANSIENT),
            "azure" => (AZURE_QUOTA, AZURE_CAPACITY, AZURE_TRANSIENT),
            _ => (GENERIC_QUOTA, GENERIC_CAPACITY, GENERIC_TRANSIENT),
        };
        Self {
            quota: owned(quota),
            capacity: owned(capacity),
            transient: owned(transient),
        }
    }

    pub fn with_quota_marker(mut self, marker: impl Into<String>) -> Self {
        self.quota.push(marker.into());
        self
    }

    pub fn with_capacity_marker(mut self, marker: impl Into<String>) -> Self {
        self.capacity.push(marker.into());
        self
    }

    pub fn with_transient_marker(mut self, marker: impl Into<String>) -> Self {
        self.transient.push(marker.into());
        self
    }

    pub fn classify(&self, output: &str) -> FailureClass {
        let matches = |markers: &[String]| markers.iter().any(|m| output.contains(m.as_str()));
        if matches(&self.quota) {
            FailureClass::Quota
        } else if matches(&self.capacity) {
            FailureClass::InsufficientCapacity
        } else if matches(&self.transient) {
            FailureClass::Transient
        } else {
            FailureClass::Unclassified
        }
    }

    /// The lifecycle error a failed create with this output should raise.
    pub fn creation_error(&self, resource: &str, output: &str) -> LifecycleError {
        let message = output.trim().to_string();
        match self.classify(output) {
            FailureClass::Quota => LifecycleError::QuotaFailure {
                resource: resource.to_string(),
                kind: QuotaKind::Quota,
                message,
            },
            FailureClass::InsufficientCapacity => LifecycleError::QuotaFailure {
                resource: resource.to_string(),
                kind: QuotaKind::InsufficientCapacity,
                message,
            },
            FailureClass::Transient => LifecycleError::RetryableCreation {
                resource: resource.to_string(),
                reason: message,
            },
            FailureClass::Unclassified => LifecycleError::Creation {
                resource: resource.to_string(),
                reason: message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("gcp", "ERROR: Quota exceeded for quota metric 'CPUS'", FailureClass::Quota)]
    #[case("gcp", "code: ZONE_RESOURCE_POOL_EXHAUSTED", FailureClass::InsufficientCapacity)]
    #[case("gcp", "rateLimitExceeded", FailureClass::Transient)]
    #[case("aws", "An error occurred (VcpuLimitExceeded)", FailureClass::Quota)]
    #[case("aws", "InsufficientInstanceCapacity in us-east-1a", FailureClass::InsufficientCapacity)]
    #[case("aws", "RequestLimitExceeded", FailureClass::Transient)]
    #[case("azure", "Operation results in exceeding quota limits: QuotaExceeded", FailureClass::Quota)]
    #[case("azure", "SkuNotAvailable", FailureClass::InsufficientCapacity)]
    #[case("Azure", "TooManyRequests", FailureClass::Transient)]
    #[case("aws", "InvalidAMIID.NotFound", FailureClass::Unclassified)]
    #[case("openstack", "quota exceeded for instances", FailureClass::Quota)]
    fn test_classify(#[case] cloud: &str, #[case] output: &str, #[case] expected: FailureClass) {
        assert_eq!(FailureClassifier::for_provider(cloud).classify(output), expected);
    }

    #[test]
    fn test_quota_wins_over_transient() {
        let classifier = FailureClassifier::for_provider("gcp");
        assert_eq!(
            classifier.classify("Quota exceeded, please try again later"),
            FailureClass::Quota
        );
    }

    #[test]
    fn test_custom_marker() {
        let classifier = FailureClassifier::for_provider("aws").with_capacity_marker("Unsupported");
        assert_eq!(
            classifier.classify("Unsupported: instance type not offered"),
            FailureClass::InsufficientCapacity
        );
    }

    #[test]
    fn test_creation_error_kinds() {
        let classifier = FailureClassifier::for_provider("gcp");
        let err = classifier.creation_error("vm-0", "ZONE_RESOURCE_POOL_EXHAUSTED\n");
        assert_eq!(err.quota_kind(), Some(QuotaKind::InsufficientCapacity));

        let err = classifier.creation_error("vm-0", "invalid machine type");
        assert!(matches!(err, LifecycleError::Creation { .. }));
        assert!(!err.is_retryable_creation());

        let err = classifier.creation_error("vm-0", "RESOURCE_NOT_READY");
        assert!(err.is_retryable_creation());
    }
}
