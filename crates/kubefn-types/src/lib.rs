//! Shared types for kubefn
//!
//! This crate contains data structures used across multiple kubefn crates:
//! function definitions and their event sources, pod observations, and log
//! filter options.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Kubernetes Resource Types
// ============================================================================

/// Label the function controller puts on every pod it runs for a function
pub const FUNCTION_LABEL: &str = "function";

/// A pod as seen on one poll tick
#[derive(Clone, Debug)]
pub struct PodObservation {
    pub name: String,
    pub namespace: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Value of the `function` label, if any
    pub function: Option<String>,
    pub containers: Vec<ContainerInfo>,
}

impl PodObservation {
    pub fn new(name: String, namespace: String) -> Self {
        Self {
            name,
            namespace,
            created_at: None,
            function: None,
            containers: Vec::new(),
        }
    }

    pub fn belongs_to(&self, function: &str) -> bool {
        self.function.as_deref() == Some(function)
    }

    /// Function pods run a single container; its readiness is the pod's.
    pub fn is_ready(&self) -> bool {
        self.containers.first().is_some_and(|c| c.ready)
    }

    pub fn restart_count(&self) -> i32 {
        self.containers.first().map_or(0, |c| c.restart_count)
    }
}

#[derive(Clone, Debug)]
pub struct ContainerInfo {
    pub name: String,
    pub ready: bool,
    pub restart_count: i32,
}

impl ContainerInfo {
    pub fn new(name: String) -> Self {
        Self {
            name,
            ready: false,
            restart_count: 0,
        }
    }
}

// ============================================================================
// Function Types
// ============================================================================

/// Errors raised while turning a raw event descriptor into an [`EventSource`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("unsupported event type '{0}' (expected 'http' or 'trigger')")]
    UnknownKind(String),

    #[error("trigger events require a non-empty topic")]
    MissingTopic,

    #[error("only one event per function is supported, found {0}")]
    TooMany(usize),
}

/// An event descriptor as written by the user, before validation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventDescriptor {
    /// Event key, e.g. `http` or `trigger`
    pub kind: String,
    pub path: Option<String>,
    pub hostname: Option<String>,
    pub topic: Option<String>,
}

impl EventDescriptor {
    pub fn http(path: Option<&str>, hostname: Option<&str>) -> Self {
        Self {
            kind: "http".to_string(),
            path: path.map(str::to_string),
            hostname: hostname.map(str::to_string),
            topic: None,
        }
    }

    pub fn trigger(topic: &str) -> Self {
        Self {
            kind: "trigger".to_string(),
            topic: Some(topic.to_string()),
            ..Default::default()
        }
    }
}

/// How invocations reach a function
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventSource {
    Http {
        path: Option<String>,
        hostname: Option<String>,
    },
    Trigger {
        topic: String,
    },
}

impl Default for EventSource {
    fn default() -> Self {
        Self::Http {
            path: None,
            hostname: None,
        }
    }
}

impl TryFrom<EventDescriptor> for EventSource {
    type Error = EventError;

    fn try_from(descriptor: EventDescriptor) -> Result<Self, Self::Error> {
        match descriptor.kind.as_str() {
            "http" => Ok(Self::Http {
                path: descriptor.path,
                hostname: descriptor.hostname,
            }),
            "trigger" => match descriptor.topic {
                Some(topic) if !topic.trim().is_empty() => Ok(Self::Trigger { topic }),
                _ => Err(EventError::MissingTopic),
            },
            other => Err(EventError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { path, .. } => write!(f, "http {}", path.as_deref().unwrap_or("/")),
            Self::Trigger { topic } => write!(f, "trigger {}", topic),
        }
    }
}

/// Everything needed to deploy one function
#[derive(Clone, Debug)]
pub struct FunctionDefinition {
    pub name: String,
    /// Target namespace; the cluster default is used when unset
    pub namespace: Option<String>,
    pub runtime: String,
    /// Handler reference in `module.entrypoint` form
    pub handler: String,
    pub source: String,
    pub dependencies: Option<String>,
    pub description: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub environment: BTreeMap<String, String>,
    /// Memory limit, e.g. `128` or `256Mi`
    pub memory: Option<String>,
    pub event: EventSource,
}

impl FunctionDefinition {
    pub fn new(name: &str, runtime: &str, handler: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: None,
            runtime: runtime.to_string(),
            handler: handler.to_string(),
            source: source.to_string(),
            dependencies: None,
            description: None,
            labels: BTreeMap::new(),
            environment: BTreeMap::new(),
            memory: None,
            event: EventSource::default(),
        }
    }

    /// Validate and attach the function's event descriptors.
    ///
    /// No descriptor means a plain HTTP function at the root path.
    pub fn with_events(mut self, events: Vec<EventDescriptor>) -> Result<Self, EventError> {
        if events.len() > 1 {
            return Err(EventError::TooMany(events.len()));
        }
        if let Some(descriptor) = events.into_iter().next() {
            self.event = EventSource::try_from(descriptor)?;
        }
        Ok(self)
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn with_memory(mut self, memory: &str) -> Self {
        self.memory = Some(memory.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_dependencies(mut self, dependencies: &str) -> Self {
        self.dependencies = Some(dependencies.to_string());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.environment.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }
}

// ============================================================================
// Log Types
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid start time '{0}' (use e.g. 15m, 2h, 1d or 2024-01-15T10:30:00Z)")]
pub struct StartTimeError(pub String);

/// Where a log time-range window begins
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartTime {
    /// Offset back from the moment the filter runs
    Relative(Duration),
    Absolute(DateTime<Utc>),
}

impl StartTime {
    /// Resolve to an absolute instant relative to `now`
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            // Offsets reaching past the earliest representable instant mean "from the start"
            Self::Relative(offset) => now
                .checked_sub_signed(*offset)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            Self::Absolute(at) => *at,
        }
    }

    /// `Some(None)` when the form is relative but the amount is out of range
    fn parse_relative(s: &str) -> Option<Option<Duration>> {
        let unit_at = s.find(|c: char| !c.is_ascii_digit())?;
        let (digits, unit) = s.split_at(unit_at);
        let amount: i64 = digits.parse().ok()?;
        match unit {
            "m" => Some(Duration::try_minutes(amount)),
            "h" => Some(Duration::try_hours(amount)),
            "d" => Some(Duration::try_days(amount)),
            _ => None,
        }
    }

    fn parse_absolute(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Some(ts.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                return Some(naive.and_utc());
            }
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }
}

impl FromStr for StartTime {
    type Err = StartTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(offset) = Self::parse_relative(s) {
            return offset
                .map(Self::Relative)
                .ok_or_else(|| StartTimeError(s.to_string()));
        }
        Self::parse_absolute(s)
            .map(Self::Absolute)
            .ok_or_else(|| StartTimeError(s.to_string()))
    }
}

/// Options applied to every batch of log text
#[derive(Clone, Debug, Default)]
pub struct LogFilterOptions {
    pub start_time: Option<StartTime>,
    /// Keep only the most recent N entries
    pub count: Option<usize>,
    pub pattern: Option<String>,
    /// Do not echo fetched logs to stdout
    pub silent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_http_event_accepts_missing_path() {
        let event = EventSource::try_from(EventDescriptor::http(None, None)).unwrap();
        assert_eq!(event, EventSource::default());
    }

    #[test]
    fn test_trigger_requires_topic() {
        assert_eq!(
            EventSource::try_from(EventDescriptor::trigger("")),
            Err(EventError::MissingTopic)
        );
        let event = EventSource::try_from(EventDescriptor::trigger("orders")).unwrap();
        assert_eq!(
            event,
            EventSource::Trigger {
                topic: "orders".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_event_kind() {
        let descriptor = EventDescriptor {
            kind: "schedule".to_string(),
            ..Default::default()
        };
        assert_eq!(
            EventSource::try_from(descriptor),
            Err(EventError::UnknownKind("schedule".to_string()))
        );
    }

    #[test]
    fn test_single_event_per_function() {
        let def = FunctionDefinition::new("hello", "python2.7", "handler.hello", "");
        let err = def
            .with_events(vec![
                EventDescriptor::http(None, None),
                EventDescriptor::trigger("t"),
            ])
            .unwrap_err();
        assert_eq!(err, EventError::TooMany(2));
    }

    #[test]
    fn test_relative_start_time() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let start: StartTime = "15m".parse().unwrap();
        assert_eq!(
            start.resolve(now),
            Utc.with_ymd_and_hms(2024, 1, 15, 11, 45, 0).unwrap()
        );
        let start: StartTime = "1d".parse().unwrap();
        assert_eq!(
            start.resolve(now),
            Utc.with_ymd_and_hms(2024, 1, 14, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_absolute_start_time() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        for input in [
            "2024-01-15T10:30:00Z",
            "2024-01-15 10:30:00",
            "2024-01-15T10:30:00",
        ] {
            let start: StartTime = input.parse().unwrap();
            assert_eq!(start, StartTime::Absolute(expected), "{input}");
        }
    }

    #[test]
    fn test_out_of_range_offset_is_an_error() {
        assert_eq!(
            "999999999999999m".parse::<StartTime>(),
            Err(StartTimeError("999999999999999m".to_string()))
        );
        assert!("99999999999999999999h".parse::<StartTime>().is_err());
    }

    #[test]
    fn test_offset_before_earliest_instant_clamps() {
        let start: StartTime = "100000000d".parse().unwrap();
        assert_eq!(start.resolve(Utc::now()), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_invalid_start_time() {
        assert!("yesterday".parse::<StartTime>().is_err());
        assert!("15s".parse::<StartTime>().is_err());
    }
}
