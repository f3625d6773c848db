//! Building and encoding metric families for re-export
//!
//! The collectors own their series rather than registering them in a
//! process-wide registry, so families are assembled directly as protobuf
//! values and handed to the text encoder.
//!
//! The text encoder cannot render untyped families, so samples of unknown
//! kind are re-exposed as gauges carrying the upstream value.

use prometheus::proto::{Counter, Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};

use super::parser::MetricKind;

/// Content type of the text exposition format
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Accumulates samples of a single metric family
#[derive(Debug)]
pub struct FamilyBuilder {
    kind: MetricKind,
    family: MetricFamily,
}

impl FamilyBuilder {
    pub fn new(name: &str, help: &str, kind: MetricKind) -> Self {
        let mut family = MetricFamily::default();
        family.set_name(name.to_string());
        family.set_help(help.to_string());
        family.set_field_type(match kind {
            MetricKind::Counter => MetricType::COUNTER,
            MetricKind::Gauge | MetricKind::Unknown => MetricType::GAUGE,
        });

        Self { kind, family }
    }

    pub fn gauge(name: &str, help: &str) -> Self {
        Self::new(name, help, MetricKind::Gauge)
    }

    pub fn counter(name: &str, help: &str) -> Self {
        Self::new(name, help, MetricKind::Counter)
    }

    /// Append one sample with the given labels, in the given order
    pub fn sample<K, V>(&mut self, labels: &[(K, V)], value: f64) -> &mut Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut metric = Metric::default();
        for (name, val) in labels {
            let mut pair = LabelPair::default();
            pair.set_name(name.as_ref().to_string());
            pair.set_value(val.as_ref().to_string());
            metric.mut_label().push(pair);
        }

        match self.kind {
            MetricKind::Counter => {
                let mut counter = Counter::default();
                counter.set_value(value);
                metric.set_counter(counter);
            }
            MetricKind::Gauge | MetricKind::Unknown => {
                let mut gauge = Gauge::default();
                gauge.set_value(value);
                metric.set_gauge(gauge);
            }
        }

        self.family.mut_metric().push(metric);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.family.get_metric().is_empty()
    }

    /// Finish the family; empty families are dropped since the encoder rejects them
    pub fn build(self) -> Option<MetricFamily> {
        if self.is_empty() {
            None
        } else {
            Some(self.family)
        }
    }
}

/// Encode families in the text exposition format
pub fn encode_text(families: &[MetricFamily]) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(families, &mut buffer)?;

    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
