//! Typed environment variable lookups
//!
//! Unset variables fall back to a default. A variable that is set but cannot
//! be parsed is an error rather than a silent fallback, so a typo in
//! `REALTIME_LIMIT` does not quietly disable a category.

use std::str::FromStr;

use crate::error::{AqError, Result};

/// Read a string variable, treating empty values as unset.
pub fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read a string variable or return `default`.
pub fn var_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

/// Parse a variable into `T`, returning `default` when it is unset.
pub fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

/// Parse a boolean variable.
///
/// Accepts `true/false`, `1/0`, `yes/no` and `on/off` in any case.
pub fn bool_or(name: &str, default: bool) -> Result<bool> {
    match var(name) {
        Some(raw) => parse_bool(&raw).ok_or_else(|| AqError::InvalidEnv {
            name: name.to_string(),
            value: raw.clone(),
            reason: "expected a boolean".to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| AqError::InvalidEnv {
        name: name.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
