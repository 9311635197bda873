use chrono::{DateTime, Utc};
use regex::Regex;

use crate::parser::{LogEntry, LogParser};
use kubefn_types::{LogFilterOptions, StartTime};

/// Compiled filter for log text.
///
/// Applies, in order: keep the last `count` entries, keep entries matching
/// the pattern, then drop everything before the first entry stamped at or
/// after the start time. Unset options are skipped.
#[derive(Clone)]
pub struct LogFilter {
    count: Option<usize>,

    /// Regex pattern (if any)
    regex: Option<Regex>,

    /// Original pattern string
    pattern: String,

    start_time: Option<StartTime>,
}

impl LogFilter {
    /// Compile a filter from options
    pub fn new(options: &LogFilterOptions) -> Result<Self, regex::Error> {
        let pattern = options.pattern.clone().unwrap_or_default();
        let regex = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(&pattern)?)
        };

        Ok(Self {
            count: options.count,
            regex,
            pattern,
            start_time: options.start_time,
        })
    }

    /// Filter raw log text, resolving relative start times against the current time
    pub fn apply(&self, raw: &str) -> String {
        self.apply_at(raw, Utc::now())
    }

    /// Filter raw log text as of `now`
    pub fn apply_at(&self, raw: &str, now: DateTime<Utc>) -> String {
        let mut entries: Vec<LogEntry> = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(LogParser::parse)
            .collect();

        if let Some(count) = self.count {
            let start = entries.len().saturating_sub(count);
            entries.drain(..start);
        }

        if let Some(re) = &self.regex {
            entries.retain(|e| re.is_match(&e.raw));
        }

        if let Some(start_time) = &self.start_time {
            let since = start_time.resolve(now);
            match entries
                .iter()
                .position(|e| e.timestamp.is_some_and(|ts| ts >= since))
            {
                Some(first) => {
                    entries.drain(..first);
                }
                None => entries.clear(),
            }
        }

        entries
            .iter()
            .map(|e| e.raw.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Check if filter is empty (keeps every non-blank line)
    pub fn is_empty(&self) -> bool {
        self.count.is_none() && self.regex.is_none() && self.start_time.is_none()
    }
}

impl std::fmt::Debug for LogFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFilter")
            .field("count", &self.count)
            .field("pattern", &self.pattern)
            .field("start_time", &self.start_time)
            .finish()
    }
}
