//! Exposition text parsing
//!
//! Reads the line-oriented Prometheus text format:
//! - `# HELP <name> <text>` opens a template for the samples that follow
//! - `# TYPE <name> <kind>` attaches a kind to the template with that name
//! - `name{label="value",...} value [timestamp]` is one sample
//!
//! Parsing is tolerant. A malformed sample is skipped with a warning and the
//! rest of the payload is still processed.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Help text used when a sample has no matching `# HELP` line
pub const DEFAULT_HELP: &str = "no description";

/// Label set of a sample, ordered by label name
pub type Labels = BTreeMap<String, String>;

/// Metric kind as announced by a `# TYPE` line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
    Unknown,
}

impl MetricKind {
    /// Map a `# TYPE` token; histogram, summary and untyped all become unknown
    pub fn from_type_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "gauge" => MetricKind::Gauge,
            "counter" => MetricKind::Counter,
            _ => MetricKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sample line together with the metadata that preceded it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedMetric {
    pub name: String,
    pub kind: MetricKind,
    pub help: String,
    pub value: f64,
    pub labels: Labels,
}

impl fmt::Display for ParsedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            write!(f, "{} {}", self.name, self.value)
        } else {
            write!(f, "{}{{{}}} {}", self.name, format_labels(&self.labels), self.value)
        }
    }
}

/// Reasons a sample line is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("sample line has no value")]
    MissingValue,

    #[error("invalid metric name {0:?}")]
    InvalidName(String),

    #[error("invalid sample value {0:?}")]
    InvalidValue(String),

    #[error("label set is not terminated by '}}'")]
    UnterminatedLabels,

    #[error("malformed label at byte {position}: {reason}")]
    MalformedLabel {
        position: usize,
        reason: &'static str,
    },
}

#[derive(Debug)]
struct Template {
    name: String,
    help: String,
    kind: MetricKind,
}

/// Parse an exposition payload into one record per sample line
pub fn parse(text: &str) -> Vec<ParsedMetric> {
    let mut metrics = Vec::new();
    let mut template: Option<Template> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            apply_comment(comment.trim_start(), &mut template);
            continue;
        }

        match parse_sample(line) {
            Ok((name, labels, value)) => {
                let (help, kind) = match &template {
                    Some(t) if t.name == name => (t.help.clone(), t.kind),
                    _ => (DEFAULT_HELP.to_string(), MetricKind::Unknown),
                };
                metrics.push(ParsedMetric {
                    name,
                    kind,
                    help,
                    value,
                    labels,
                });
            }
            Err(err) => {
                warn!(line = idx + 1, error = %err, "Skipping malformed sample line");
            }
        }
    }

    metrics
}

fn apply_comment(comment: &str, template: &mut Option<Template>) {
    if let Some(body) = comment.strip_prefix("HELP ") {
        let body = body.trim_start();
        let (name, help) = match body.split_once(char::is_whitespace) {
            Some((name, help)) => (name, help.trim()),
            None => (body, ""),
        };
        if name.is_empty() {
            return;
        }

        let help = if help.is_empty() {
            DEFAULT_HELP.to_string()
        } else {
            unescape_help(help)
        };
        *template = Some(Template {
            name: name.to_string(),
            help,
            kind: MetricKind::Unknown,
        });
    } else if let Some(body) = comment.strip_prefix("TYPE ") {
        let mut parts = body.split_whitespace();
        let (Some(name), Some(kind)) = (parts.next(), parts.next()) else {
            return;
        };
        let kind = MetricKind::from_type_token(kind);

        let same_name = template.as_ref().is_some_and(|t| t.name == name);
        if same_name {
            if let Some(t) = template.as_mut() {
                t.kind = kind;
            }
        } else {
            *template = Some(Template {
                name: name.to_string(),
                help: DEFAULT_HELP.to_string(),
                kind,
            });
        }
    }
}

fn unescape_help(help: &str) -> String {
    let mut out = String::with_capacity(help.len());
    let mut chars = help.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn parse_sample(line: &str) -> Result<(String, Labels, f64), ParseError> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or(ParseError::MissingValue)?;
    let name = &line[..name_end];
    if !is_valid_metric_name(name) {
        return Err(ParseError::InvalidName(name.to_string()));
    }

    let rest = &line[name_end..];
    let (labels, rest) = match rest.strip_prefix('{') {
        Some(body) => {
            let close = find_closing_brace(body).ok_or(ParseError::UnterminatedLabels)?;
            (parse_labels(&body[..close])?, &body[close + 1..])
        }
        None => (Labels::new(), rest),
    };

    // Anything after the value is a timestamp, which is not relayed
    let raw_value = rest
        .split_whitespace()
        .next()
        .ok_or(ParseError::MissingValue)?;
    let value = parse_value(raw_value)?;

    Ok((name.to_string(), labels, value))
}

fn parse_value(raw: &str) -> Result<f64, ParseError> {
    match raw {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => raw
            .parse::<f64>()
            .map_err(|_| ParseError::InvalidValue(raw.to_string())),
    }
}

/// Byte offset of the `}` closing a label set, skipping quoted values
fn find_closing_brace(body: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;

    for (idx, c) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '}' if !in_quotes => return Some(idx),
            _ => {}
        }
    }

    None
}

/// Parse the inside of a `{...}` label set
///
/// Commas and braces inside quoted values do not split the list, and the
/// `\"`, `\\` and `\n` escapes are decoded.
pub fn parse_labels(input: &str) -> Result<Labels, ParseError> {
    let mut labels = Labels::new();
    let mut chars = input.char_indices().peekable();

    let position = |chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>| {
        chars.peek().map(|(i, _)| *i).unwrap_or(input.len())
    };

    loop {
        while chars.peek().is_some_and(|(_, c)| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let key_start = position(&mut chars);
        let mut key = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        if !is_valid_label_name(&key) {
            return Err(ParseError::MalformedLabel {
                position: key_start,
                reason: "invalid label name",
            });
        }

        while chars.peek().is_some_and(|(_, c)| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            Some((_, '=')) => {}
            _ => {
                return Err(ParseError::MalformedLabel {
                    position: key_start,
                    reason: "expected '=' after label name",
                })
            }
        }

        while chars.peek().is_some_and(|(_, c)| c.is_whitespace()) {
            chars.next();
        }
        let value_start = position(&mut chars);
        match chars.next() {
            Some((_, '"')) => {}
            _ => {
                return Err(ParseError::MalformedLabel {
                    position: value_start,
                    reason: "label value must be quoted",
                })
            }
        }

        let mut value = String::new();
        let mut closed = false;
        while let Some((_, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => break,
                },
                '"' => {
                    closed = true;
                    break;
                }
                other => value.push(other),
            }
        }
        if !closed {
            return Err(ParseError::MalformedLabel {
                position: value_start,
                reason: "unterminated label value",
            });
        }
        labels.insert(key, value);

        while chars.peek().is_some_and(|(_, c)| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            None => break,
            Some((_, ',')) => continue,
            Some((pos, _)) => {
                return Err(ParseError::MalformedLabel {
                    position: pos,
                    reason: "expected ',' between labels",
                })
            }
        }
    }

    Ok(labels)
}

/// Render a label map in exposition syntax, without the surrounding braces
pub fn format_labels(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_help_type_and_samples() {
        let text = r#"# HELP amf_session Active AMF sessions
# TYPE amf_session gauge
amf_session{slice="1"} 12
amf_session{slice="2"} 3
"#;
        let metrics = parse(text);

        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].name, "amf_session");
        assert_eq!(metrics[0].kind, MetricKind::Gauge);
        assert_eq!(metrics[0].help, "Active AMF sessions");
        assert_eq!(metrics[0].value, 12.0);
        assert_eq!(metrics[0].labels, labels(&[("slice", "1")]));
        assert_eq!(metrics[1].value, 3.0);
    }

    #[test]
    fn test_sample_without_template_is_unknown() {
        let metrics = parse("ran_ue 4\ngnb{id=\"7\"} 1\n");

        assert_eq!(metrics.len(), 2);
        for metric in &metrics {
            assert_eq!(metric.kind, MetricKind::Unknown);
            assert_eq!(metric.help, DEFAULT_HELP);
        }
    }

    #[test]
    fn test_template_does_not_leak_to_other_names() {
        let text = "# HELP a_total A counter\n# TYPE a_total counter\na_total 1\nb_gauge 2\n";
        let metrics = parse(text);

        assert_eq!(metrics[0].kind, MetricKind::Counter);
        assert_eq!(metrics[1].kind, MetricKind::Unknown);
        assert_eq!(metrics[1].help, DEFAULT_HELP);
    }

    #[test]
    fn test_type_without_help_opens_template() {
        let metrics = parse("# TYPE pfcp_sessions_active gauge\npfcp_sessions_active 5\n");

        assert_eq!(metrics[0].kind, MetricKind::Gauge);
        assert_eq!(metrics[0].help, DEFAULT_HELP);
    }

    #[test]
    fn test_kind_follows_most_recent_type_line() {
        let text = "# TYPE x counter\nx 1\n# TYPE x gauge\nx 2\n";
        let metrics = parse(text);

        assert_eq!(metrics[0].kind, MetricKind::Counter);
        assert_eq!(metrics[1].kind, MetricKind::Gauge);
    }

    #[test]
    fn test_histogram_series_are_unknown() {
        let text = r#"# HELP latency Request latency
# TYPE latency histogram
latency_bucket{le="0.1"} 4
latency_sum 0.3
latency_count 4
"#;
        let metrics = parse(text);

        assert_eq!(metrics.len(), 3);
        assert!(metrics.iter().all(|m| m.kind == MetricKind::Unknown));
        assert_eq!(metrics[0].labels, labels(&[("le", "0.1")]));
    }

    #[test]
    fn test_one_record_per_sample_line() {
        let text = r#"
# HELP fivegs_amffunction_rm_reginitreq Initial registration requests
# TYPE fivegs_amffunction_rm_reginitreq counter
fivegs_amffunction_rm_reginitreq 10

# some free-form comment
fivegs_amffunction_rm_reginitsucc 9
gnb 2
"#;
        let sample_lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .count();

        assert_eq!(parse(text).len(), sample_lines);
    }

    #[test]
    fn test_quoted_comma_and_brace_in_label_value() {
        let metrics = parse(r#"m{path="/a,b}",code="200"} 1"#);

        assert_eq!(metrics.len(), 1);
        assert_eq!(
            metrics[0].labels,
            labels(&[("path", "/a,b}"), ("code", "200")])
        );
    }

    #[test]
    fn test_escaped_quote_in_label_value() {
        let metrics = parse(r#"m{msg="say \"hi\"\\now"} 1"#);

        assert_eq!(metrics[0].labels["msg"], "say \"hi\"\\now");
    }

    #[test]
    fn test_timestamp_and_special_values() {
        let metrics = parse("a 1.5 1700000000000\nb +Inf\nc -Inf\nd NaN\ne 1e3\n");

        assert_eq!(metrics.len(), 5);
        assert_eq!(metrics[0].value, 1.5);
        assert_eq!(metrics[1].value, f64::INFINITY);
        assert_eq!(metrics[2].value, f64::NEG_INFINITY);
        assert!(metrics[3].value.is_nan());
        assert_eq!(metrics[4].value, 1000.0);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let text = r#"good 1
bad_value abc
bad_labels{a=1} 2
unterminated{a="x" 3
no_value
9starts_with_digit 4
also_good{a="b"} 5
"#;
        let metrics = parse(text);

        let names: Vec<&str> = metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["good", "also_good"]);
    }

    #[test]
    fn test_label_parse_errors() {
        assert!(matches!(
            parse_labels(r#"a="1" b="2""#),
            Err(ParseError::MalformedLabel { .. })
        ));
        assert!(matches!(
            parse_labels(r#"="1""#),
            Err(ParseError::MalformedLabel { .. })
        ));
        assert!(matches!(
            parse_labels(r#"a="1"#),
            Err(ParseError::MalformedLabel { .. })
        ));
        assert_eq!(parse_labels(r#"a="1","#).unwrap(), labels(&[("a", "1")]));
        assert!(parse_labels("").unwrap().is_empty());
    }

    #[test]
    fn test_label_round_trip() {
        let original = labels(&[
            ("dnn", "internet"),
            ("list", "a,b,c"),
            ("quoted", "he said \"ok\""),
            ("slash", "C:\\path"),
            ("multi", "line1\nline2"),
            ("empty", ""),
        ]);

        let rendered = format_labels(&original);
        assert_eq!(parse_labels(&rendered).unwrap(), original);
    }

    #[test]
    fn test_display_renders_sample_line() {
        let metric = ParsedMetric {
            name: "upf_sessions".to_string(),
            kind: MetricKind::Gauge,
            help: DEFAULT_HELP.to_string(),
            value: 3.0,
            labels: labels(&[("dnn", "a,b")]),
        };

        let reparsed = parse(&metric.to_string());
        assert_eq!(reparsed[0].labels, metric.labels);
        assert_eq!(reparsed[0].value, 3.0);
    }

    #[test]
    fn test_help_escapes_are_decoded() {
        let metrics = parse("# HELP m first\\nsecond \\\\ done\nm 1\n");
        assert_eq!(metrics[0].help, "first\nsecond \\ done");
    }
}
