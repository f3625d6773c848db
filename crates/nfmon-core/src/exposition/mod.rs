//! Prometheus text exposition: parsing upstream payloads and encoding our own

mod encode;
mod parser;

pub use encode::{encode_text, FamilyBuilder, TEXT_CONTENT_TYPE};
pub use parser::{
    format_labels, parse, parse_labels, Labels, MetricKind, ParseError, ParsedMetric,
    DEFAULT_HELP,
};
