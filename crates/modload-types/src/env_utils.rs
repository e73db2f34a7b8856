//! Environment overrides for loader settings.
//!
//! A variable that is unset, blank or unparsable counts as absent, so a bad
//! override falls back to the built-in default instead of failing the loader.
//!
//! # Example
//!
//! ```
//! use modload_types::env_utils::{env_duration_ms, env_parse_or};
//! use std::time::Duration;
//!
//! let watch: u64 = env_parse_or("MODLOAD_EXAMPLE_WATCH_MS", 25);
//! assert_eq!(watch, 25);
//!
//! let wait: Option<Duration> = env_duration_ms("MODLOAD_EXAMPLE_WAIT_MS");
//! assert!(wait.is_none());
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Trimmed value of `key`, `None` when unset or blank.
fn raw(key: &str) -> Option<String> {
    let value = std::env::var(key).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    raw(key).and_then(|v| v.parse().ok())
}

pub fn env_parse_or<T: FromStr>(key: &str, default: T) -> T {
    env_parse(key).unwrap_or(default)
}

/// `true` for `1`, `true`, `yes` or `on`, ignoring case. Anything else is off.
pub fn env_flag(key: &str) -> bool {
    raw(key).is_some_and(|v| {
        ["1", "true", "yes", "on"]
            .iter()
            .any(|on| v.eq_ignore_ascii_case(on))
    })
}

/// An identifier override, such as the module API name sources call.
///
/// Values that could not appear as an identifier in source text are ignored.
pub fn env_name_or(key: &str, default: &str) -> String {
    raw(key)
        .filter(|v| is_identifier(v))
        .unwrap_or_else(|| default.to_string())
}

/// A millisecond count as a [`Duration`]; `0` disables the setting.
pub fn env_duration_ms(key: &str) -> Option<Duration> {
    env_parse::<u64>(key)
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
