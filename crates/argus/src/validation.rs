//! Rule-based validation of a [`Config`].
//!
//! Two entry points: [`validate`] returns the first error and ignores
//! warnings; [`validate_detailed`] produces the full report. Both are
//! deterministic: the same config always yields the same issue set in
//! the same order.
//!
//! Rule codes are user-visible identifiers. The codes covering negative
//! ranges and unknown enum names (`ARGUS_INVALID_CACHE_TTL`,
//! `ARGUS_INVALID_OPTIMIZATION`, negative buffer/flush values) fire from
//! the string-typed environment and file loaders, where such inputs can
//! actually occur; the typed validator here covers everything
//! representable in [`Config`] itself.

use std::fmt::{self, Display, Formatter};

use crate::config::{
    Config, MAX_FILES_SOFT_LIMIT, MAX_POLL_INTERVAL, MAX_RING_CAPACITY, MIN_POLL_INTERVAL,
    MIN_RING_CAPACITY,
};
use crate::error::{Error, Result};

/// Validation rule codes, stable across releases.
pub mod codes {
    /// Poll interval is zero or above the 10-minute ceiling.
    pub const INVALID_POLL_INTERVAL: &str = "ARGUS_INVALID_POLL_INTERVAL";
    /// Poll interval is positive but under the 10 ms stability floor.
    pub const POLL_INTERVAL_TOO_SMALL: &str = "ARGUS_POLL_INTERVAL_TOO_SMALL";
    /// Cache TTL could not be parsed as a non-negative duration.
    pub const INVALID_CACHE_TTL: &str = "ARGUS_INVALID_CACHE_TTL";
    /// Cache TTL exceeds the poll interval (warning).
    pub const CACHE_TTL_TOO_LARGE: &str = "ARGUS_CACHE_TTL_TOO_LARGE";
    /// Watched-file bound is zero.
    pub const INVALID_MAX_WATCHED_FILES: &str = "ARGUS_INVALID_MAX_WATCHED_FILES";
    /// Watched-file bound exceeds the soft limit (warning).
    pub const MAX_FILES_TOO_LARGE: &str = "ARGUS_MAX_FILES_TOO_LARGE";
    /// Unknown optimization strategy name.
    pub const INVALID_OPTIMIZATION: &str = "ARGUS_INVALID_OPTIMIZATION";
    /// Explicit ring capacity is not a power of two in 32..=1_048_576.
    pub const INVALID_BOREAS_CAPACITY: &str = "ARGUS_INVALID_BOREAS_CAPACITY";
    /// Audit enabled without an output file.
    pub const INVALID_AUDIT_CONFIG: &str = "ARGUS_INVALID_AUDIT_CONFIG";
    /// Audit buffer size is out of range.
    pub const INVALID_BUFFER_SIZE: &str = "ARGUS_INVALID_BUFFER_SIZE";
    /// Audit flush interval is out of range.
    pub const INVALID_FLUSH_INTERVAL: &str = "ARGUS_INVALID_FLUSH_INTERVAL";
    /// Audit output directory is missing or not writable.
    pub const UNWRITABLE_OUTPUT_FILE: &str = "ARGUS_UNWRITABLE_OUTPUT_FILE";
}

/// Ceiling on the audit flush interval.
pub(crate) const MAX_FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);
/// Ceiling on the audit buffer size.
pub(crate) const MAX_AUDIT_BUFFER: usize = 100_000;

/// A single rule violation or warning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationIssue {
    /// The `ARGUS_`-prefixed rule code.
    pub code: &'static str,
    /// Human-readable description.
    pub message: String,
}

impl ValidationIssue {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Display for ValidationIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Full validation result.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    /// `true` when no error-grade issue was found.
    pub valid: bool,
    /// Error-grade issues; any one of these fails [`validate`].
    pub errors: Vec<ValidationIssue>,
    /// Warning-grade issues; surfaced but never fatal.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Whether a specific rule code appears among the errors.
    #[must_use]
    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|issue| issue.code == code)
    }

    /// Whether a specific rule code appears among the warnings.
    #[must_use]
    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|issue| issue.code == code)
    }
}

impl Display for ValidationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "validation: {} ({} errors, {} warnings)",
            if self.valid { "ok" } else { "failed" },
            self.errors.len(),
            self.warnings.len()
        )?;
        for issue in &self.errors {
            writeln!(f, "  error   {issue}")?;
        }
        for issue in &self.warnings {
            writeln!(f, "  warning {issue}")?;
        }
        Ok(())
    }
}

/// Returns the first rule violation, ignoring warnings.
///
/// # Errors
///
/// [`Error::InvalidConfig`] carrying the violated rule's code.
pub fn validate(config: &Config) -> Result<()> {
    let report = validate_detailed(config);
    match report.errors.into_iter().next() {
        Some(issue) => Err(Error::invalid_config(issue.code, issue.message)),
        None => Ok(()),
    }
}

/// Runs every rule and reports all errors and warnings.
#[must_use]
pub fn validate_detailed(config: &Config) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.poll_interval.is_zero() {
        report.errors.push(ValidationIssue::new(
            codes::INVALID_POLL_INTERVAL,
            "poll interval must be positive",
        ));
    } else if config.poll_interval < MIN_POLL_INTERVAL {
        report.errors.push(ValidationIssue::new(
            codes::POLL_INTERVAL_TOO_SMALL,
            format!(
                "poll interval {:?} is below the {:?} stability floor",
                config.poll_interval, MIN_POLL_INTERVAL
            ),
        ));
    } else if config.poll_interval > MAX_POLL_INTERVAL {
        report.errors.push(ValidationIssue::new(
            codes::INVALID_POLL_INTERVAL,
            format!(
                "poll interval {:?} exceeds the {:?} ceiling",
                config.poll_interval, MAX_POLL_INTERVAL
            ),
        ));
    }

    if config.cache_ttl > config.poll_interval {
        report.warnings.push(ValidationIssue::new(
            codes::CACHE_TTL_TOO_LARGE,
            format!(
                "cache TTL {:?} exceeds the poll interval {:?}; changes will be observed late",
                config.cache_ttl, config.poll_interval
            ),
        ));
    }

    if config.max_watched_files == 0 {
        report.errors.push(ValidationIssue::new(
            codes::INVALID_MAX_WATCHED_FILES,
            "max watched files must be at least 1",
        ));
    } else if config.max_watched_files > MAX_FILES_SOFT_LIMIT {
        report.warnings.push(ValidationIssue::new(
            codes::MAX_FILES_TOO_LARGE,
            format!(
                "{} watched files exceeds the {} soft limit; expect long polling ticks",
                config.max_watched_files, MAX_FILES_SOFT_LIMIT
            ),
        ));
    }

    if config.boreas_capacity != 0
        && (!config.boreas_capacity.is_power_of_two()
            || config.boreas_capacity < MIN_RING_CAPACITY
            || config.boreas_capacity > MAX_RING_CAPACITY)
    {
        report.errors.push(ValidationIssue::new(
            codes::INVALID_BOREAS_CAPACITY,
            format!(
                "ring capacity {} must be a power of two in {}..={}",
                config.boreas_capacity, MIN_RING_CAPACITY, MAX_RING_CAPACITY
            ),
        ));
    }

    validate_audit(config, &mut report);

    report.valid = report.errors.is_empty();
    report
}

fn validate_audit(config: &Config, report: &mut ValidationReport) {
    let audit = &config.audit;

    // Only the empty-output-file rule is conditioned on the master
    // switch; the range and writability rules hold for any audit config.
    if audit.enabled && audit.output_file.as_os_str().is_empty() {
        report.errors.push(ValidationIssue::new(
            codes::INVALID_AUDIT_CONFIG,
            "audit is enabled but no output file is configured",
        ));
    }

    if !audit.output_file.as_os_str().is_empty() {
        let parent = match audit.output_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        match std::fs::metadata(&parent) {
            Ok(metadata) if metadata.is_dir() => {
                if metadata.permissions().readonly() {
                    report.errors.push(ValidationIssue::new(
                        codes::UNWRITABLE_OUTPUT_FILE,
                        format!(
                            "audit output directory '{}' is not writable",
                            parent.display()
                        ),
                    ));
                }
            }
            _ => {
                report.errors.push(ValidationIssue::new(
                    codes::UNWRITABLE_OUTPUT_FILE,
                    format!(
                        "audit output directory '{}' does not exist",
                        parent.display()
                    ),
                ));
            }
        }
    }

    if audit.buffer_size == 0 {
        report.errors.push(ValidationIssue::new(
            codes::INVALID_BUFFER_SIZE,
            "audit buffer size must be at least 1",
        ));
    } else if audit.buffer_size > MAX_AUDIT_BUFFER {
        report.errors.push(ValidationIssue::new(
            codes::INVALID_BUFFER_SIZE,
            format!(
                "audit buffer size {} exceeds the {} ceiling",
                audit.buffer_size, MAX_AUDIT_BUFFER
            ),
        ));
    }

    if audit.flush_interval > MAX_FLUSH_INTERVAL {
        report.errors.push(ValidationIssue::new(
            codes::INVALID_FLUSH_INTERVAL,
            format!(
                "audit flush interval {:?} exceeds the {:?} ceiling",
                audit.flush_interval, MAX_FLUSH_INTERVAL
            ),
        ));
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditConfig;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        let report = validate_detailed(&Config::default());
        assert!(report.valid, "{report}");
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_zero_poll_interval() {
        let config = Config {
            poll_interval: Duration::ZERO,
            cache_ttl: Duration::ZERO,
            ..Config::default()
        };
        let report = validate_detailed(&config);
        assert!(report.has_error(codes::INVALID_POLL_INTERVAL));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_tiny_poll_interval() {
        let config = Config {
            poll_interval: Duration::from_millis(5),
            cache_ttl: Duration::from_millis(1),
            ..Config::default()
        };
        assert!(validate_detailed(&config).has_error(codes::POLL_INTERVAL_TOO_SMALL));
    }

    #[test]
    fn test_cache_ttl_warning_is_not_fatal() {
        let config = Config {
            poll_interval: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(5),
            ..Config::default()
        };
        let report = validate_detailed(&config);
        assert!(report.valid);
        assert!(report.has_warning(codes::CACHE_TTL_TOO_LARGE));
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_capacity_must_be_power_of_two_in_range() {
        for bad in [15usize, 31, 33, 100, 1 << 21] {
            let config = Config {
                boreas_capacity: bad,
                ..Config::default()
            };
            assert!(
                validate_detailed(&config).has_error(codes::INVALID_BOREAS_CAPACITY),
                "{bad} should be rejected"
            );
        }

        for good in [0usize, 32, 64, 1024, 1 << 20] {
            let config = Config {
                boreas_capacity: good,
                ..Config::default()
            };
            assert!(
                !validate_detailed(&config).has_error(codes::INVALID_BOREAS_CAPACITY),
                "{good} should be accepted"
            );
        }
    }

    #[test]
    fn test_invalid_report_scenario() {
        let config = Config {
            poll_interval: Duration::ZERO,
            cache_ttl: Duration::from_secs(5),
            max_watched_files: 0,
            boreas_capacity: 15,
            audit: AuditConfig {
                enabled: true,
                output_file: std::path::PathBuf::new(),
                buffer_size: 0,
                ..AuditConfig::default()
            },
            ..Config::default()
        };

        let report = validate_detailed(&config);
        assert!(!report.valid);
        for code in [
            codes::INVALID_POLL_INTERVAL,
            codes::INVALID_MAX_WATCHED_FILES,
            codes::INVALID_BOREAS_CAPACITY,
            codes::INVALID_AUDIT_CONFIG,
            codes::INVALID_BUFFER_SIZE,
        ] {
            assert!(report.has_error(code), "missing {code}:\n{report}");
        }
    }

    #[test]
    fn test_determinism() {
        let config = Config {
            poll_interval: Duration::ZERO,
            max_watched_files: 0,
            boreas_capacity: 100,
            ..Config::default()
        };
        let first = validate_detailed(&config);
        let second = validate_detailed(&config);
        assert_eq!(first.errors, second.errors);
        assert_eq!(first.warnings, second.warnings);
    }

    #[test]
    fn test_unwritable_output_dir() {
        let config = Config {
            audit: AuditConfig {
                enabled: true,
                output_file: std::path::PathBuf::from("/nonexistent-dir-for-sure/audit.jsonl"),
                ..AuditConfig::default()
            },
            ..Config::default()
        };
        assert!(validate_detailed(&config).has_error(codes::UNWRITABLE_OUTPUT_FILE));
    }

    #[test]
    fn test_audit_ranges_checked_even_when_disabled() {
        let config = Config {
            audit: AuditConfig {
                enabled: false,
                output_file: std::path::PathBuf::from("/nonexistent-dir-for-sure/audit.jsonl"),
                buffer_size: 0,
                flush_interval: Duration::from_secs(600),
                ..AuditConfig::default()
            },
            ..Config::default()
        };

        let report = validate_detailed(&config);
        assert!(report.has_error(codes::INVALID_BUFFER_SIZE));
        assert!(report.has_error(codes::INVALID_FLUSH_INTERVAL));
        assert!(report.has_error(codes::UNWRITABLE_OUTPUT_FILE));
        // Only the empty-output-file rule is gated on the switch.
        assert!(!report.has_error(codes::INVALID_AUDIT_CONFIG));
    }
}
