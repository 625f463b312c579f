// ABOUTME: Environment variable parsing utilities
// ABOUTME: Typed readers with defaults, validation warnings and legacy fallbacks

use std::str::FromStr;
use std::time::Duration;

/// Parse an environment variable with a fallback default value.
/// Returns the default if the variable is unset or cannot be parsed.
pub fn parse_env_or_default<T>(var_name: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(var_name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Parse an environment variable and keep it only if `validator` accepts it.
/// Logs a warning when the variable is set but unparseable or rejected.
pub fn parse_env_or_default_with_validation<T, F>(var_name: &str, default: T, validator: F) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(T) -> bool,
{
    let Ok(raw_value) = std::env::var(var_name) else {
        return default;
    };

    match raw_value.trim().parse::<T>() {
        Ok(parsed) if validator(parsed) => parsed,
        Ok(_) => {
            tracing::warn!(
                "Environment variable {} has invalid value '{}', using default: {}",
                var_name,
                raw_value,
                default
            );
            default
        }
        Err(_) => {
            tracing::warn!(
                "Environment variable {} has unparseable value '{}', using default: {}",
                var_name,
                raw_value,
                default
            );
            default
        }
    }
}

/// Read a string variable, trying `primary_var` first and then `fallback_var`.
pub fn string_env_with_fallback(primary_var: &str, fallback_var: &str) -> Option<String> {
    std::env::var(primary_var)
        .or_else(|_| std::env::var(fallback_var))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a non-empty string variable.
pub fn string_env(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a boolean flag. Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
pub fn parse_bool_env(var_name: &str, default: bool) -> bool {
    let Some(raw) = string_env(var_name) else {
        return default;
    };

    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            tracing::warn!(
                "Environment variable {} has non-boolean value '{}', using default: {}",
                var_name,
                raw,
                default
            );
            default
        }
    }
}

/// Read a millisecond count as a `Duration`, rejecting zero.
pub fn parse_duration_ms_env(var_name: &str, default: Duration) -> Duration {
    let millis = parse_env_or_default_with_validation(
        var_name,
        default.as_millis() as u64,
        |v: u64| v > 0,
    );
    Duration::from_millis(millis)
}
