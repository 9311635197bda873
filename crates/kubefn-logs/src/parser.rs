use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

/// Bracketed access-log timestamp written by the function runtimes,
/// e.g. `[21/Jun/2017:10:18:22 +0000]`
static ACCESS_LOG_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d{2}/[A-Za-z]{3}/\d{4}:\d{2}:\d{2}:\d{2} [+-]\d{4})\]")
        .expect("access log timestamp pattern is valid")
});

/// RFC 3339 timestamp anywhere in the line
static RFC3339_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})")
        .expect("rfc3339 timestamp pattern is valid")
});

/// A single log line
#[derive(Clone, Debug)]
pub struct LogEntry {
    /// Original raw log line
    pub raw: String,

    /// Embedded timestamp (if any)
    pub timestamp: Option<DateTime<Utc>>,
}

/// Log parser for extracting timestamps from raw log lines
pub struct LogParser;

impl LogParser {
    /// Parse a raw log line into a LogEntry
    pub fn parse(raw: &str) -> LogEntry {
        LogEntry {
            raw: raw.to_string(),
            timestamp: Self::extract_timestamp(raw),
        }
    }

    /// Find the first embedded timestamp in a line
    pub fn extract_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        Self::extract_k8s_timestamp(raw)
            .or_else(|| Self::extract_access_log_timestamp(raw))
            .or_else(|| Self::extract_rfc3339_timestamp(raw))
    }

    /// Extract Kubernetes timestamp from the beginning of a log line
    fn extract_k8s_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        // K8s timestamp format: 2024-01-15T10:30:00.123456789Z (30 chars)
        // Sometimes shorter: 2024-01-15T10:30:00Z (20 chars)
        if raw.len() < 20 {
            return None;
        }
        // Use get() to safely handle UTF-8 multi-byte chars at boundaries
        let search_end = Self::floor_char_boundary(raw, 35.min(raw.len()));
        let z_pos = raw.get(..search_end)?.find('Z')?;
        DateTime::parse_from_rfc3339(&raw[..=z_pos])
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    fn extract_access_log_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        let captures = ACCESS_LOG_TIMESTAMP.captures(raw)?;
        DateTime::parse_from_str(&captures[1], "%d/%b/%Y:%H:%M:%S %z")
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    fn extract_rfc3339_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        let found = RFC3339_TIMESTAMP.find(raw)?;
        DateTime::parse_from_rfc3339(found.as_str())
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Find the largest valid char boundary <= the given byte index
    fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
        if idx >= s.len() {
            return s.len();
        }
        // Walk backwards to find a valid char boundary
        while idx > 0 && !s.is_char_boundary(idx) {
            idx -= 1;
        }
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_k8s_timestamp() {
        let line = "2024-01-15T10:30:00.123456789Z some log message";
        let entry = LogParser::parse(line);
        assert!(entry.timestamp.is_some());
    }

    #[test]
    fn test_parse_access_log_timestamp() {
        let line = r#"172.17.0.1 - - [21/Jun/2017:10:18:22 +0000] "GET / HTTP/1.1" 200 11"#;
        let entry = LogParser::parse(line);
        assert_eq!(
            entry.timestamp,
            Some(Utc.with_ymd_and_hms(2017, 6, 21, 10, 18, 22).unwrap())
        );
    }

    #[test]
    fn test_access_log_offset_is_applied() {
        let line = "[21/Jun/2017:12:18:22 +0200] handled";
        assert_eq!(
            LogParser::extract_timestamp(line),
            Some(Utc.with_ymd_and_hms(2017, 6, 21, 10, 18, 22).unwrap())
        );
    }

    #[test]
    fn test_embedded_rfc3339_timestamp() {
        let line = "INFO at 2024-01-15T10:30:00+01:00 request served";
        assert_eq!(
            LogParser::extract_timestamp(line),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_line_without_timestamp() {
        assert!(LogParser::extract_timestamp("Bottle v0.12.13 server starting up").is_none());
    }

    #[test]
    fn test_parse_multibyte_utf8_no_panic() {
        // Box-drawing characters are 3 bytes each, this tests UTF-8 boundary handling
        let line = "─────────────────────────────────────────";
        let entry = LogParser::parse(line);
        assert!(entry.timestamp.is_none());

        let line2 = "2024-01-15T10:30:00Z ╭────────────────────────────╮";
        let entry2 = LogParser::parse(line2);
        assert!(entry2.timestamp.is_some());
    }
}
