//! Failure kinds reported by the catalog, the analysis service, or the
//! dispatcher, and the severity each one carries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every way a sample or batch can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No response within the per-call timeout
    Timeout,
    /// Provider signalled its rate limit was exceeded
    RateLimited,
    /// Transient transport or server error
    Network,
    /// Credentials rejected
    Unauthorized,
    /// Service permanently gone
    ServiceUnavailable,
    /// Request rejected because our configuration is malformed
    InvalidConfiguration,
    /// Sample bytes could not be decoded
    CorruptInput,
    /// Sample format not supported
    UnsupportedFormat,
    /// Sample could not be read from disk
    Unreadable,
    /// Provider refused the sample without a more specific reason
    Rejected,
    /// Sample was in the request but absent from the response
    MissingResult,
    /// Recoverable failures persisted past the retry budget
    RetriesExhausted,
}

/// How a failure affects retry and job continuation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Retry with backoff
    Recoverable,
    /// Abort the whole job
    Fatal,
    /// Resolve the sample with a skip marker and continue
    Skippable,
}

impl FailureKind {
    pub fn severity(self) -> Severity {
        match self {
            FailureKind::Timeout
            | FailureKind::RateLimited
            | FailureKind::Network
            | FailureKind::MissingResult => Severity::Recoverable,
            FailureKind::Unauthorized
            | FailureKind::ServiceUnavailable
            | FailureKind::InvalidConfiguration => Severity::Fatal,
            FailureKind::CorruptInput
            | FailureKind::UnsupportedFormat
            | FailureKind::Unreadable
            | FailureKind::Rejected
            | FailureKind::RetriesExhausted => Severity::Skippable,
        }
    }

    /// Map a provider error code to a failure kind
    ///
    /// Unknown codes are treated as a per-sample rejection.
    pub fn from_provider_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "timeout" => FailureKind::Timeout,
            "rate_limited" | "rate_limit_exceeded" => FailureKind::RateLimited,
            "network" | "transient" | "internal" => FailureKind::Network,
            "unauthorized" | "forbidden" | "auth" => FailureKind::Unauthorized,
            "service_unavailable" | "gone" => FailureKind::ServiceUnavailable,
            "invalid_configuration" | "bad_request" => FailureKind::InvalidConfiguration,
            "corrupt_input" | "corrupt" | "decode_error" => FailureKind::CorruptInput,
            "unsupported_format" | "unsupported" => FailureKind::UnsupportedFormat,
            _ => FailureKind::Rejected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Network => "network",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::ServiceUnavailable => "service_unavailable",
            FailureKind::InvalidConfiguration => "invalid_configuration",
            FailureKind::CorruptInput => "corrupt_input",
            FailureKind::UnsupportedFormat => "unsupported_format",
            FailureKind::Unreadable => "unreadable",
            FailureKind::Rejected => "rejected",
            FailureKind::MissingResult => "missing_result",
            FailureKind::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    /// Strict inverse of `as_str`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "timeout" => FailureKind::Timeout,
            "rate_limited" => FailureKind::RateLimited,
            "network" => FailureKind::Network,
            "unauthorized" => FailureKind::Unauthorized,
            "service_unavailable" => FailureKind::ServiceUnavailable,
            "invalid_configuration" => FailureKind::InvalidConfiguration,
            "corrupt_input" => FailureKind::CorruptInput,
            "unsupported_format" => FailureKind::UnsupportedFormat,
            "unreadable" => FailureKind::Unreadable,
            "rejected" => FailureKind::Rejected,
            "missing_result" => FailureKind::MissingResult,
            "retries_exhausted" => FailureKind::RetriesExhausted,
            other => return Err(format!("Unknown failure kind: {}", other)),
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [FailureKind; 12] = [
        FailureKind::Timeout,
        FailureKind::RateLimited,
        FailureKind::Network,
        FailureKind::Unauthorized,
        FailureKind::ServiceUnavailable,
        FailureKind::InvalidConfiguration,
        FailureKind::CorruptInput,
        FailureKind::UnsupportedFormat,
        FailureKind::Unreadable,
        FailureKind::Rejected,
        FailureKind::MissingResult,
        FailureKind::RetriesExhausted,
    ];

    #[test]
    fn test_transient_kinds_are_recoverable() {
        for kind in [FailureKind::Timeout, FailureKind::RateLimited, FailureKind::Network] {
            assert_eq!(kind.severity(), Severity::Recoverable, "{kind}");
        }
    }

    #[test]
    fn test_auth_and_config_are_fatal() {
        assert_eq!(FailureKind::Unauthorized.severity(), Severity::Fatal);
        assert_eq!(FailureKind::ServiceUnavailable.severity(), Severity::Fatal);
        assert_eq!(FailureKind::InvalidConfiguration.severity(), Severity::Fatal);
    }

    #[test]
    fn test_code_round_trip() {
        // Every kind the provider can name maps back to itself
        for kind in ALL {
            if matches!(
                kind,
                FailureKind::Unreadable | FailureKind::MissingResult | FailureKind::RetriesExhausted
            ) {
                continue;
            }
            assert_eq!(FailureKind::from_provider_code(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_unknown_code_is_rejected() {
        assert_eq!(FailureKind::from_provider_code("weird"), FailureKind::Rejected);
        assert_eq!(FailureKind::Rejected.severity(), Severity::Skippable);
    }

    #[test]
    fn test_from_str_inverts_as_str() {
        for kind in ALL {
            assert_eq!(kind.as_str().parse::<FailureKind>(), Ok(kind));
        }
        assert!("nope".parse::<FailureKind>().is_err());
    }

    #[test]
    fn test_serde_matches_as_str() {
        for kind in ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
