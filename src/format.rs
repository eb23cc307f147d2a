//! Rendering of [`LogRecord`]s into Splunk JSON envelopes.
//!
//! An envelope is one JSON object of the shape
//! `{"time":<epoch>,"event":{...},"source"?,"sourcetype"?,"host"?,"index"?,"fields"?}`
//! terminated by a line break. The line break is the only framing the TCP
//! stream carries; the HTTP collector path strips it before concatenating
//! envelopes back to back.

use crate::fields::CustomFields;
use crate::record::LogRecord;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sub-second precision of the envelope's `time` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubSecondPrecision {
    #[default]
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl SubSecondPrecision {
    pub fn digits(self) -> u32 {
        match self {
            SubSecondPrecision::Milliseconds => 3,
            SubSecondPrecision::Microseconds => 6,
            SubSecondPrecision::Nanoseconds => 9,
        }
    }
}

/// Render a timestamp as epoch seconds with a fixed number of sub-second
/// digits, rounded half away from zero.
///
/// The output is always plain decimal (`1433188255.500`), zero-padded to
/// the full digit count, never scientific notation and never a bare
/// trailing point. This is the time format the Splunk collector expects.
pub fn to_epoch(timestamp: DateTime<Utc>, precision: SubSecondPrecision) -> String {
    let digits = precision.digits();
    let total_nanos = timestamp.timestamp() as i128 * 1_000_000_000
        + i128::from(timestamp.timestamp_subsec_nanos());
    let scale = 10u128.pow(9 - digits);
    let magnitude = total_nanos.unsigned_abs();
    // Half away from zero: rounding on the magnitude, sign re-applied below.
    let rounded = (magnitude + scale / 2) / scale;
    let base = 10u128.pow(digits);
    let sign = if total_nanos < 0 { "-" } else { "" };
    format!(
        "{}{}.{:0width$}",
        sign,
        rounded / base,
        rounded % base,
        width = digits as usize
    )
}

/// Best-effort rendering of a `{Name}` message template against the
/// record's properties.
///
/// String values substitute verbatim, other values as compact JSON.
/// Unknown tokens are left in place and doubled braces escape a literal
/// brace. Rendering never fails; a malformed template renders as-is.
pub fn render_template(template: &str, properties: &BTreeMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut token = String::new();
                let mut closed = false;
                for t in chars.by_ref() {
                    if t == '}' {
                        closed = true;
                        break;
                    }
                    token.push(t);
                }
                if !closed {
                    out.push('{');
                    out.push_str(&token);
                    continue;
                }
                // Lookup ignores alignment/format suffixes like {N:x} or {N,8}.
                let name = token
                    .split(|c| c == ':' || c == ',')
                    .next()
                    .unwrap_or(&token);
                match properties.get(name) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(value) => out.push_str(&value.to_string()),
                    None => {
                        out.push('{');
                        out.push_str(&token);
                        out.push('}');
                    }
                }
            }
            c => out.push(c),
        }
    }
    out
}

/// Collect, in template order, best-effort renderings of tokens that
/// carry a format specifier such as `{Count:000}`.
///
/// The format itself is not applied; each value substitutes exactly as
/// it does in the rendered message, and an unknown token renders as its
/// literal text. Tokens without a `:` format produce no rendering.
pub fn render_format_tokens(template: &str, properties: &BTreeMap<String, Value>) -> Vec<String> {
    let mut renderings = Vec::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
            }
            '{' => {
                let mut token = String::new();
                let mut closed = false;
                for t in chars.by_ref() {
                    if t == '}' {
                        closed = true;
                        break;
                    }
                    token.push(t);
                }
                if !closed || !token.contains(':') {
                    continue;
                }
                let name = token
                    .split(|c| c == ':' || c == ',')
                    .next()
                    .unwrap_or(&token);
                renderings.push(match properties.get(name) {
                    Some(Value::String(s)) => s.clone(),
                    Some(value) => value.to_string(),
                    None => format!("{{{token}}}"),
                });
            }
            _ => {}
        }
    }
    renderings
}

/// Static envelope settings shared by all formatter variants.
#[derive(Debug, Clone)]
pub struct FormatterOptions {
    /// Include the raw `MessageTemplate` in the event. When false the key
    /// is omitted entirely, not emitted as an empty string.
    pub render_template: bool,
    /// Include a `RenderedMessage` produced from the template and
    /// properties.
    pub render_message: bool,
    pub precision: SubSecondPrecision,
    pub source: Option<String>,
    pub source_type: Option<String>,
    pub host: Option<String>,
    pub index: Option<String>,
    pub fields: Option<CustomFields>,
}

impl Default for FormatterOptions {
    fn default() -> Self {
        FormatterOptions {
            render_template: true,
            render_message: true,
            precision: SubSecondPrecision::Milliseconds,
            source: None,
            source_type: None,
            host: None,
            index: None,
            fields: None,
        }
    }
}

fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Build the static envelope tail: optional source/sourcetype/host/index
/// and custom fields, plus the closing brace. Computed once per sink.
fn static_suffix(options: &FormatterOptions) -> String {
    let mut suffix = String::new();
    if let Some(source) = &options.source {
        suffix.push_str(",\"source\":");
        suffix.push_str(&quote(source));
    }
    if let Some(source_type) = &options.source_type {
        suffix.push_str(",\"sourcetype\":");
        suffix.push_str(&quote(source_type));
    }
    if let Some(host) = &options.host {
        suffix.push_str(",\"host\":");
        suffix.push_str(&quote(host));
    }
    if let Some(index) = &options.index {
        suffix.push_str(",\"index\":");
        suffix.push_str(&quote(index));
    }
    if let Some(fields) = &options.fields {
        if !fields.is_empty() {
            suffix.push_str(",\"fields\":");
            suffix.push_str(&fields.to_json());
        }
    }
    suffix.push('}');
    suffix
}

/// The default envelope formatter.
///
/// Pure function of its inputs; safe to call concurrently from multiple
/// sinks. Formatting never fails: a record that cannot be rendered still
/// produces a best-effort envelope.
#[derive(Debug, Clone)]
pub struct SplunkJsonFormatter {
    render_template: bool,
    render_message: bool,
    precision: SubSecondPrecision,
    suffix: String,
}

impl SplunkJsonFormatter {
    pub fn new(options: &FormatterOptions) -> Self {
        SplunkJsonFormatter {
            render_template: options.render_template,
            render_message: options.render_message,
            precision: options.precision,
            suffix: static_suffix(options),
        }
    }

    pub fn format(&self, record: &LogRecord) -> String {
        let mut event = serde_json::Map::new();
        event.insert("Level".into(), Value::String(record.level.to_string()));
        if self.render_template {
            event.insert(
                "MessageTemplate".into(),
                Value::String(record.message_template.clone()),
            );
        }
        if self.render_message {
            let message = record
                .rendered_message
                .clone()
                .unwrap_or_else(|| render_template(&record.message_template, &record.properties));
            event.insert("RenderedMessage".into(), Value::String(message));
        }
        if let Some(exception) = &record.exception {
            event.insert("Exception".into(), Value::String(exception.clone()));
        }
        if !record.properties.is_empty() {
            let properties: serde_json::Map<String, Value> = record
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            event.insert("Properties".into(), Value::Object(properties));
        }

        let mut out = String::with_capacity(128 + self.suffix.len());
        out.push_str("{\"time\":");
        out.push_str(&to_epoch(record.timestamp, self.precision));
        out.push_str(",\"event\":");
        out.push_str(&Value::Object(event).to_string());
        out.push_str(&self.suffix);
        out.push('\n');
        out
    }
}

/// Compact envelope variant with `@`-prefixed reserved keys inside the
/// event: `@l` (level), `@mt` (template), `@r` (renderings of
/// format-bearing tokens), `@x` (exception). Properties are inlined
/// next to them, so a property name starting with the reserved `@`
/// marker is escaped by doubling it.
#[derive(Debug, Clone)]
pub struct CompactSplunkJsonFormatter {
    render_template: bool,
    precision: SubSecondPrecision,
    suffix: String,
}

impl CompactSplunkJsonFormatter {
    pub fn new(options: &FormatterOptions) -> Self {
        let mut suffix = String::from("}");
        suffix.push_str(&static_suffix(options));
        CompactSplunkJsonFormatter {
            render_template: options.render_template,
            precision: options.precision,
            suffix,
        }
    }

    pub fn format(&self, record: &LogRecord) -> String {
        let mut out = String::with_capacity(128 + self.suffix.len());
        out.push_str("{\"time\":\"");
        out.push_str(&to_epoch(record.timestamp, self.precision));
        out.push_str("\",\"event\":{\"@l\":\"");
        out.push_str(record.level.as_str());
        out.push('"');
        if self.render_template {
            out.push_str(",\"@mt\":");
            out.push_str(&quote(&record.message_template));
            let renderings = render_format_tokens(&record.message_template, &record.properties);
            if !renderings.is_empty() {
                out.push_str(",\"@r\":[");
                for (i, rendering) in renderings.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&quote(rendering));
                }
                out.push(']');
            }
        }
        if let Some(exception) = &record.exception {
            out.push_str(",\"@x\":");
            out.push_str(&quote(exception));
        }
        for (name, value) in &record.properties {
            let name = if name.starts_with('@') {
                format!("@{name}")
            } else {
                name.clone()
            };
            out.push(',');
            out.push_str(&quote(&name));
            out.push(':');
            out.push_str(&value.to_string());
        }
        out.push_str(&self.suffix);
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{CustomField, CustomFields};
    use crate::record::Level;
    use chrono::TimeZone;

    fn at(secs: i64, nanos: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, nanos).single().unwrap()
    }

    #[test]
    fn epoch_millisecond_precision() {
        assert_eq!(
            to_epoch(at(1_640_995_200, 0), SubSecondPrecision::Milliseconds),
            "1640995200.000"
        );
        assert_eq!(
            to_epoch(at(1_640_995_200, 123_000_000), SubSecondPrecision::Milliseconds),
            "1640995200.123"
        );
    }

    #[test]
    fn epoch_micro_and_nano_precision() {
        assert_eq!(
            to_epoch(at(1_640_995_200, 123_456_789), SubSecondPrecision::Microseconds),
            "1640995200.123457"
        );
        assert_eq!(
            to_epoch(at(1_640_995_200, 123_456_789), SubSecondPrecision::Nanoseconds),
            "1640995200.123456789"
        );
    }

    #[test]
    fn epoch_rounds_half_away_from_zero() {
        // 0.0015s at millisecond precision rounds up, not to even.
        assert_eq!(
            to_epoch(at(10, 1_500_000), SubSecondPrecision::Milliseconds),
            "10.002"
        );
        // A fraction that rounds up past one second carries into the
        // integer part.
        assert_eq!(
            to_epoch(at(10, 999_500_000), SubSecondPrecision::Milliseconds),
            "11.000"
        );
    }

    #[test]
    fn epoch_digit_count_matches_precision() {
        for (precision, digits) in [
            (SubSecondPrecision::Milliseconds, 3),
            (SubSecondPrecision::Microseconds, 6),
            (SubSecondPrecision::Nanoseconds, 9),
        ] {
            let rendered = to_epoch(at(1, 0), precision);
            let frac = rendered.split('.').nth(1).unwrap();
            assert_eq!(frac.len(), digits);
        }
    }

    #[test]
    fn template_renderer_substitutes_properties() {
        let mut props = BTreeMap::new();
        props.insert("Name".to_string(), serde_json::json!("world"));
        props.insert("Count".to_string(), serde_json::json!(3));
        assert_eq!(
            render_template("hello {Name} x{Count}", &props),
            "hello world x3"
        );
    }

    #[test]
    fn template_renderer_is_best_effort() {
        let props = BTreeMap::new();
        assert_eq!(render_template("{Missing} kept", &props), "{Missing} kept");
        assert_eq!(render_template("{{literal}}", &props), "{literal}");
        assert_eq!(render_template("broken {Oops", &props), "broken {Oops");
    }

    fn record() -> LogRecord {
        LogRecord::new(Level::Information, "One {Property}")
            .with_timestamp(at(1_640_995_200, 0))
            .with_property("Property", 42)
    }

    #[test]
    fn envelope_is_valid_json_with_expected_shape() {
        let formatter = SplunkJsonFormatter::new(&FormatterOptions::default());
        let rendered = formatter.format(&record());
        assert!(rendered.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(rendered.trim_end()).unwrap();
        assert_eq!(parsed["time"], serde_json::json!(1640995200.0));
        assert_eq!(parsed["event"]["Level"], "Information");
        assert_eq!(parsed["event"]["MessageTemplate"], "One {Property}");
        assert_eq!(parsed["event"]["RenderedMessage"], "One 42");
        assert_eq!(parsed["event"]["Properties"]["Property"], 42);
    }

    #[test]
    fn template_key_is_omitted_when_not_rendered() {
        let options = FormatterOptions {
            render_template: false,
            ..FormatterOptions::default()
        };
        let rendered = SplunkJsonFormatter::new(&options).format(&record());
        let parsed: serde_json::Value = serde_json::from_str(rendered.trim_end()).unwrap();
        assert!(parsed["event"].get("MessageTemplate").is_none());

        let compact = CompactSplunkJsonFormatter::new(&options).format(&record());
        assert!(!compact.contains("@mt"));
    }

    #[test]
    fn static_metadata_and_fields_are_appended() {
        let options = FormatterOptions {
            source: Some("svc".into()),
            source_type: Some("_json".into()),
            host: Some("web01".into()),
            index: Some("main".into()),
            fields: Some(CustomFields::new(vec![CustomField::new_list(
                "role",
                ["svc", "rest"],
            )])),
            ..FormatterOptions::default()
        };
        let rendered = SplunkJsonFormatter::new(&options).format(&record());
        assert!(rendered.contains(r#""source":"svc""#));
        assert!(rendered.contains(r#""sourcetype":"_json""#));
        assert!(rendered.contains(r#""host":"web01""#));
        assert!(rendered.contains(r#""index":"main""#));
        assert!(rendered.contains(r#""fields":{"role":["svc","rest"]}"#));
        serde_json::from_str::<serde_json::Value>(rendered.trim_end()).unwrap();
    }

    #[test]
    fn compact_variant_escapes_reserved_marker() {
        let record = record().with_property("@odd", "x");
        let rendered =
            CompactSplunkJsonFormatter::new(&FormatterOptions::default()).format(&record);
        let parsed: serde_json::Value = serde_json::from_str(rendered.trim_end()).unwrap();
        assert_eq!(parsed["event"]["@@odd"], "x");
        assert_eq!(parsed["event"]["@l"], "Information");
        // Compact `time` is a quoted, fully padded string.
        assert_eq!(parsed["time"], "1640995200.000");
    }

    #[test]
    fn compact_variant_lists_renderings_for_format_tokens() {
        let record = LogRecord::new(Level::Information, "pi is {Pi:000} at {When:hh:mm}")
            .with_timestamp(at(1_640_995_200, 0))
            .with_property("Pi", 3);
        let rendered = CompactSplunkJsonFormatter::new(&FormatterOptions::default()).format(&record);
        let parsed: serde_json::Value = serde_json::from_str(rendered.trim_end()).unwrap();
        // One rendering per format-bearing token, in template order; an
        // unknown token renders as its literal text.
        assert_eq!(
            parsed["event"]["@r"],
            serde_json::json!(["3", "{When:hh:mm}"])
        );

        // No format-bearing tokens, no @r key at all.
        let plain =
            CompactSplunkJsonFormatter::new(&FormatterOptions::default()).format(&self::record());
        assert!(!plain.contains("@r"));
    }

    #[test]
    fn exception_is_carried_in_both_variants() {
        let record = record().with_exception("DivideByZero: at main()");
        let plain = SplunkJsonFormatter::new(&FormatterOptions::default()).format(&record);
        let compact = CompactSplunkJsonFormatter::new(&FormatterOptions::default()).format(&record);
        let plain: serde_json::Value = serde_json::from_str(plain.trim_end()).unwrap();
        let compact: serde_json::Value = serde_json::from_str(compact.trim_end()).unwrap();
        assert_eq!(plain["event"]["Exception"], "DivideByZero: at main()");
        assert_eq!(compact["event"]["@x"], "DivideByZero: at main()");
    }
}
