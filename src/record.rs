use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Severity of a [`LogRecord`], ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Level {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Verbose => "Verbose",
            Level::Debug => "Debug",
            Level::Information => "Information",
            Level::Warning => "Warning",
            Level::Error => "Error",
            Level::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured log record handed to a sink.
///
/// The record is immutable once built: the caller owns it until it is
/// passed to [`crate::sink::LogSink::emit`], after which the sink owns
/// it for the duration of formatting and delivery.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    /// The raw, unrendered message template, e.g. `"One {Property}"`.
    pub message_template: String,
    /// A pre-rendered message, if the producer already rendered one.
    pub rendered_message: Option<String>,
    /// Formatted exception text, if the record carries one.
    pub exception: Option<String>,
    /// Ordered name -> structured value mapping. Values may be scalars,
    /// sequences or nested mappings.
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl LogRecord {
    pub fn new(level: Level, message_template: impl Into<String>) -> Self {
        LogRecord {
            timestamp: Utc::now(),
            level,
            message_template: message_template.into(),
            rendered_message: None,
            exception: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_rendered_message(mut self, message: impl Into<String>) -> Self {
        self.rendered_message = Some(message.into());
        self
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }
}
