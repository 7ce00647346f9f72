//! Environment lookups with defaults. Unset falls back to the default;
//! set-but-unparsable is an error rather than a silent default.

use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

pub fn string_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

pub fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| Error::InvalidEnv { name, value: raw }),
        Err(_) => Ok(default),
    }
}

pub fn secs_or(name: &'static str, default_secs: u64) -> Result<Duration> {
    parse_or(name, default_secs).map(Duration::from_secs)
}
