//! Environment and multi-source configuration loading.
//!
//! Precedence is fixed: defaults, overlaid by the config file (when
//! present and parseable), overlaid by `ARGUS_*` environment variables.
//! The environment always wins. A missing or unparseable file is a
//! warning-grade diagnostic, never fatal; invalid *environment* values
//! fail hard with the specific rule code, because they are always
//! deliberate.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use crate::audit::AuditLevel;
use crate::config::{
    Config, MAX_POLL_INTERVAL, MAX_RING_CAPACITY, MIN_POLL_INTERVAL, MIN_RING_CAPACITY,
    OptimizationStrategy,
};
use crate::error::{Error, Result};
use crate::format::ConfigFormat;
use crate::parser;
use crate::security;
use crate::validation::codes;
use crate::validation::{MAX_AUDIT_BUFFER, MAX_FLUSH_INTERVAL};

pub(crate) const ENV_POLL_INTERVAL: &str = "ARGUS_POLL_INTERVAL";
pub(crate) const ENV_CACHE_TTL: &str = "ARGUS_CACHE_TTL";
pub(crate) const ENV_MAX_WATCHED_FILES: &str = "ARGUS_MAX_WATCHED_FILES";
pub(crate) const ENV_OPTIMIZATION_STRATEGY: &str = "ARGUS_OPTIMIZATION_STRATEGY";
pub(crate) const ENV_BOREAS_CAPACITY: &str = "ARGUS_BOREAS_CAPACITY";
pub(crate) const ENV_AUDIT_ENABLED: &str = "ARGUS_AUDIT_ENABLED";
pub(crate) const ENV_AUDIT_OUTPUT_FILE: &str = "ARGUS_AUDIT_OUTPUT_FILE";
pub(crate) const ENV_AUDIT_MIN_LEVEL: &str = "ARGUS_AUDIT_MIN_LEVEL";
pub(crate) const ENV_AUDIT_BUFFER_SIZE: &str = "ARGUS_AUDIT_BUFFER_SIZE";
pub(crate) const ENV_AUDIT_FLUSH_INTERVAL: &str = "ARGUS_AUDIT_FLUSH_INTERVAL";
/// Second opt-in required before the environment may switch audit off.
pub(crate) const ENV_AUDIT_ALLOW_DISABLE: &str = "ARGUS_AUDIT_ALLOW_DISABLE";

/// Parses the boolean tokens accepted in configuration sources.
///
/// True: `true`, `1`, `yes`, `on`, `enabled`. False: `false`, `0`,
/// `no`, `off`, `disabled`. Case-insensitive, trimmed. Anything else is
/// `false` with a warning.
#[must_use]
pub fn parse_bool(raw: &str) -> bool {
    let token = raw.trim().to_ascii_lowercase();
    match token.as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => true,
        "false" | "0" | "no" | "off" | "disabled" => false,
        other => {
            tracing::warn!(token = other, "unrecognized boolean token, treating as false");
            false
        }
    }
}

/// Parses a duration with the extended unit set (`d` = 24 h, `w` = 7 d)
/// on top of the standard suffixes.
///
/// # Errors
///
/// [`Error::Parse`] when the string is not a valid duration.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| Error::parse("duration", format!("'{}': {e}", raw.trim())))
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_duration(name: &str, code: &'static str) -> Result<Option<Duration>> {
    match env_value(name) {
        Some(raw) => {
            let value = parse_duration(&raw)
                .map_err(|e| Error::invalid_config(code, format!("{name}: {e}")))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Overlays `ARGUS_*` environment values onto `config`.
///
/// # Errors
///
/// [`Error::InvalidConfig`] with the specific rule code for any invalid
/// or out-of-range value, or [`Error::Security`] for a rejected audit
/// output path.
pub(crate) fn overlay_env(config: &mut Config) -> Result<()> {
    if let Some(value) = env_duration(ENV_POLL_INTERVAL, codes::INVALID_POLL_INTERVAL)? {
        if value.is_zero() || value > MAX_POLL_INTERVAL {
            return Err(Error::invalid_config(
                codes::INVALID_POLL_INTERVAL,
                format!("{ENV_POLL_INTERVAL} must be in {MIN_POLL_INTERVAL:?}..={MAX_POLL_INTERVAL:?}, got {value:?}"),
            ));
        }
        if value < MIN_POLL_INTERVAL {
            return Err(Error::invalid_config(
                codes::POLL_INTERVAL_TOO_SMALL,
                format!("{ENV_POLL_INTERVAL} {value:?} is below the {MIN_POLL_INTERVAL:?} floor"),
            ));
        }
        config.poll_interval = value;
    }

    if let Some(value) = env_duration(ENV_CACHE_TTL, codes::INVALID_CACHE_TTL)? {
        config.cache_ttl = value;
    }

    if let Some(raw) = env_value(ENV_MAX_WATCHED_FILES) {
        let parsed: i64 = raw.parse().map_err(|_| {
            Error::invalid_config(
                codes::INVALID_MAX_WATCHED_FILES,
                format!("{ENV_MAX_WATCHED_FILES} is not an integer: '{raw}'"),
            )
        })?;
        if parsed <= 0 {
            return Err(Error::invalid_config(
                codes::INVALID_MAX_WATCHED_FILES,
                format!("{ENV_MAX_WATCHED_FILES} must be at least 1, got {parsed}"),
            ));
        }
        config.max_watched_files = parsed as usize;
    }

    if let Some(raw) = env_value(ENV_OPTIMIZATION_STRATEGY) {
        config.optimization_strategy = OptimizationStrategy::parse(&raw).ok_or_else(|| {
            Error::invalid_config(
                codes::INVALID_OPTIMIZATION,
                format!("unknown optimization strategy '{raw}'"),
            )
        })?;
    }

    if let Some(raw) = env_value(ENV_BOREAS_CAPACITY) {
        let parsed: u64 = raw.parse().map_err(|_| {
            Error::invalid_config(
                codes::INVALID_BOREAS_CAPACITY,
                format!("{ENV_BOREAS_CAPACITY} is not an integer: '{raw}'"),
            )
        })?;
        let capacity = parsed as usize;
        if capacity != 0
            && (!capacity.is_power_of_two()
                || capacity < MIN_RING_CAPACITY
                || capacity > MAX_RING_CAPACITY)
        {
            return Err(Error::invalid_config(
                codes::INVALID_BOREAS_CAPACITY,
                format!(
                    "{ENV_BOREAS_CAPACITY} must be a power of two in {MIN_RING_CAPACITY}..={MAX_RING_CAPACITY}, got {capacity}"
                ),
            ));
        }
        config.boreas_capacity = capacity;
    }

    overlay_audit_env(config)?;

    Ok(())
}

fn overlay_audit_env(config: &mut Config) -> Result<()> {
    if let Some(raw) = env_value(ENV_AUDIT_ENABLED) {
        let desired = parse_bool(&raw);
        if desired {
            config.audit.enabled = true;
        } else if config.audit.enabled {
            // Switching an enabled audit trail off needs the second
            // opt-in; a lone "disable" is ignored and logged.
            let confirmed = env_value(ENV_AUDIT_ALLOW_DISABLE)
                .map(|v| parse_bool(&v))
                .unwrap_or(false);
            if confirmed {
                config.audit.enabled = false;
            } else {
                tracing::warn!(
                    "{} requested audit off, but {} is not set; keeping audit enabled",
                    ENV_AUDIT_ENABLED,
                    ENV_AUDIT_ALLOW_DISABLE
                );
            }
        }
    }

    if let Some(raw) = env_value(ENV_AUDIT_OUTPUT_FILE) {
        let path = Path::new(&raw);
        security::validate_watchable_path(path)?;
        config.audit.output_file = path.to_path_buf();
    }

    if let Some(raw) = env_value(ENV_AUDIT_MIN_LEVEL) {
        config.audit.min_level = AuditLevel::parse(&raw).ok_or_else(|| {
            Error::invalid_audit_config(format!("unknown audit level '{raw}'"))
        })?;
    }

    if let Some(raw) = env_value(ENV_AUDIT_BUFFER_SIZE) {
        let parsed: i64 = raw.parse().map_err(|_| {
            Error::invalid_config(
                codes::INVALID_BUFFER_SIZE,
                format!("{ENV_AUDIT_BUFFER_SIZE} is not an integer: '{raw}'"),
            )
        })?;
        if parsed < 0 || parsed > MAX_AUDIT_BUFFER as i64 {
            return Err(Error::invalid_config(
                codes::INVALID_BUFFER_SIZE,
                format!(
                    "{ENV_AUDIT_BUFFER_SIZE} must be in 0..={MAX_AUDIT_BUFFER}, got {parsed}"
                ),
            ));
        }
        config.audit.buffer_size = parsed as usize;
    }

    if let Some(value) = env_duration(ENV_AUDIT_FLUSH_INTERVAL, codes::INVALID_FLUSH_INTERVAL)? {
        if value > MAX_FLUSH_INTERVAL {
            return Err(Error::invalid_config(
                codes::INVALID_FLUSH_INTERVAL,
                format!(
                    "{ENV_AUDIT_FLUSH_INTERVAL} {value:?} exceeds the {MAX_FLUSH_INTERVAL:?} ceiling"
                ),
            ));
        }
        config.audit.flush_interval = value;
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// File overlay
// ─────────────────────────────────────────────────────────────────────────────

/// Overlays values from a config file. Returns `Ok(true)` when the file
/// was applied, `Ok(false)` when it was skipped with a warning.
///
/// # Errors
///
/// Only [`Error::Security`]: an unreadable or unparseable file is
/// warning-grade by design.
pub(crate) fn overlay_file(config: &mut Config, path: &Path) -> Result<bool> {
    security::validate_watchable_path(path)?;

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "config file unreadable, falling back to environment and defaults"
            );
            return Ok(false);
        }
    };

    let format = ConfigFormat::from_path(path);
    let map = match parser::global().parse(&bytes, format) {
        Ok(map) => map,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "config file unparseable, falling back to environment and defaults"
            );
            return Ok(false);
        }
    };

    for (key, value) in &map {
        apply_file_value(config, key, value);
    }

    Ok(true)
}

fn apply_file_value(config: &mut Config, key: &str, value: &Value) {
    match key {
        "poll_interval" => {
            if let Some(duration) = duration_from_value(key, value) {
                config.poll_interval = duration;
            }
        }
        "cache_ttl" => {
            if let Some(duration) = duration_from_value(key, value) {
                config.cache_ttl = duration;
            }
        }
        "max_watched_files" => {
            if let Some(count) = value.as_i64().filter(|v| *v > 0) {
                config.max_watched_files = count as usize;
            } else {
                warn_skipped(key, value);
            }
        }
        "optimization_strategy" => {
            match value.as_str().and_then(OptimizationStrategy::parse) {
                Some(strategy) => config.optimization_strategy = strategy,
                None => warn_skipped(key, value),
            }
        }
        "boreas_capacity" => {
            if let Some(capacity) = value.as_u64() {
                config.boreas_capacity = capacity as usize;
            } else {
                warn_skipped(key, value);
            }
        }
        "audit" => {
            if let Value::Object(audit) = value {
                for (audit_key, audit_value) in audit {
                    apply_audit_file_value(config, audit_key, audit_value);
                }
            } else {
                warn_skipped(key, value);
            }
        }
        _ => {
            tracing::debug!(key, "ignoring unknown config file key");
        }
    }
}

fn apply_audit_file_value(config: &mut Config, key: &str, value: &Value) {
    match key {
        "enabled" => match bool_from_value(value) {
            Some(enabled) => config.audit.enabled = enabled,
            None => warn_skipped("audit.enabled", value),
        },
        "output_file" => match value.as_str() {
            Some(path) if security::validate_watchable_path(Path::new(path)).is_ok() => {
                config.audit.output_file = Path::new(path).to_path_buf();
            }
            _ => warn_skipped("audit.output_file", value),
        },
        "min_level" => match value.as_str().and_then(AuditLevel::parse) {
            Some(level) => config.audit.min_level = level,
            None => warn_skipped("audit.min_level", value),
        },
        "buffer_size" => match value.as_i64() {
            Some(size) if (0..=MAX_AUDIT_BUFFER as i64).contains(&size) => {
                config.audit.buffer_size = size as usize;
            }
            _ => warn_skipped("audit.buffer_size", value),
        },
        "flush_interval" => {
            if let Some(duration) = duration_from_value("audit.flush_interval", value) {
                config.audit.flush_interval = duration;
            }
        }
        "include_stack" => match bool_from_value(value) {
            Some(include) => config.audit.include_stack = include,
            None => warn_skipped("audit.include_stack", value),
        },
        _ => {
            tracing::debug!(key, "ignoring unknown audit config file key");
        }
    }
}

fn duration_from_value(key: &str, value: &Value) -> Option<Duration> {
    let parsed = match value {
        Value::String(raw) => parse_duration(raw).ok(),
        Value::Number(n) => n.as_u64().map(Duration::from_secs),
        _ => None,
    };
    if parsed.is_none() {
        warn_skipped(key, value);
    }
    parsed
}

fn bool_from_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(raw) => Some(parse_bool(raw)),
        _ => None,
    }
}

fn warn_skipped(key: &str, value: &Value) {
    tracing::warn!(key, %value, "invalid config file value, keeping previous");
}

/// Multi-source load: defaults ← file ← environment.
///
/// # Errors
///
/// Security rejection of the file path, or invalid environment values.
pub(crate) fn load_multi_source(file_path: &Path) -> Result<Config> {
    let mut config = Config::default();

    if !file_path.as_os_str().is_empty() {
        overlay_file(&mut config, file_path)?;
    }

    overlay_env(&mut config)?;
    Ok(config)
}

// ============================================================================
// Unit Tests
// ============================================================================
