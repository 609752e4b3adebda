// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! Worker log line classification — pure string predicates, no state.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    /// A line indicating the worker has reached a ready-to-serve state.
    Ready,
    Error,
    Warning,
    /// A line announcing the port the worker bound to.
    PortAnnouncement(u16),
    Info,
}

const READY_PHRASES: &[&str] = &[
    "Server running",
    "Running on",
    "Starting server",
    "Web UI available at",
    "Server listening",
];

const ERROR_PHRASES: &[&str] = &["ERROR", "error:", "Exception", "Traceback"];
const WARNING_PHRASES: &[&str] = &["WARNING", "WARN", "warning:"];

static LOCALHOST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"localhost:(\d+)").unwrap());
static LOOPBACK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"127\.0\.0\.1:(\d+)").unwrap());
static RUNNING_ON_PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Running on.*port (\d+)").unwrap());

fn contains_any(line: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| line.contains(n))
}

/// Classify a single log line, in precedence order: ready signal, then
/// error, then warning, then port announcement, then info.
pub fn classify(line: &str) -> LogCategory {
    if contains_any(line, READY_PHRASES) || LOCALHOST_RE.is_match(line) {
        return LogCategory::Ready;
    }
    if contains_any(line, ERROR_PHRASES) {
        return LogCategory::Error;
    }
    if contains_any(line, WARNING_PHRASES) {
        return LogCategory::Warning;
    }
    if let Some(port) = extract_port(line) {
        return LogCategory::PortAnnouncement(port);
    }
    LogCategory::Info
}

/// Extract a port number from any of the three announcement patterns,
/// independent of overall classification precedence.
pub fn extract_port(line: &str) -> Option<u16> {
    for re in [&*LOCALHOST_RE, &*LOOPBACK_RE, &*RUNNING_ON_PORT_RE] {
        if let Some(caps) = re.captures(line) {
            if let Some(m) = caps.get(1) {
                if let Ok(port) = m.as_str().parse() {
                    return Some(port);
                }
            }
        }
    }
    None
}

pub fn is_ready(line: &str) -> bool {
    classify(line) == LogCategory::Ready
}

/// Known unrecoverable patterns. Checked against the `errors` buffer,
/// not every raw line, so this stays separate from `classify`'s
/// precedence chain.
const FATAL_PATTERNS: &[&str] = &["ModuleNotFoundError", "Fatal error", "Could not find model"];

pub fn is_fatal(line: &str) -> bool {
    contains_any(line, FATAL_PATTERNS)
}

#[cfg(test)]
mod fatal_tests {
    use super::*;

    #[test]
    fn detects_module_not_found_as_fatal() {
        assert!(is_fatal("ModuleNotFoundError: No module named 'foo'"));
    }

    #[test]
    fn does_not_flag_ordinary_errors_as_fatal() {
        assert!(!is_fatal("ERROR: request timed out"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_signal_takes_precedence_over_everything() {
        assert_eq!(
            classify("Starting server on localhost:8188"),
            LogCategory::Ready
        );
    }

    #[test]
    fn classifies_error_lines() {
        assert_eq!(classify("Traceback (most recent call last):"), LogCategory::Error);
        assert_eq!(classify("ERROR: model missing"), LogCategory::Error);
    }

    #[test]
    fn classifies_warning_lines() {
        assert_eq!(classify("WARNING: low vram"), LogCategory::Warning);
        assert_eq!(classify("deprecation warning: foo"), LogCategory::Warning);
    }

    #[test]
    fn classifies_port_announcement_when_nothing_else_matches() {
        assert_eq!(
            classify("bound to 127.0.0.1:8189"),
            LogCategory::PortAnnouncement(8189)
        );
    }

    #[test]
    fn classifies_plain_lines_as_info() {
        assert_eq!(classify("loading checkpoint shard 1/4"), LogCategory::Info);
    }

    #[test]
    fn extracts_port_from_running_on_pattern() {
        assert_eq!(extract_port("Running on all addresses, port 9000"), Some(9000));
    }
}
