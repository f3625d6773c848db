//! Latest-value store for the series a collector re-exposes

use prometheus::proto::MetricFamily;
use std::collections::BTreeMap;
use tracing::debug;

use crate::exposition::{encode_text, FamilyBuilder, Labels, MetricKind, ParsedMetric};
use crate::models::NfType;

/// Label carrying the monitored component's name
pub const COMPONENT_ID_LABEL: &str = "component_id";
/// Label carrying the network function role
pub const NF_TYPE_LABEL: &str = "nf_type";

/// Label values in output order: injected labels first, then upstream labels by name
type SeriesKey = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct FamilyKey {
    name: String,
    kind: MetricKind,
}

#[derive(Debug, Default)]
struct FamilyEntry {
    help: String,
    series: BTreeMap<SeriesKey, f64>,
}

/// Series seen from one upstream endpoint, keyed by name, kind and labels
///
/// Entries are created lazily on first sight and only ever updated; a series
/// that disappears upstream keeps its last value until the collector stops.
/// A name holds a single kind at a time: when the upstream changes a
/// metric's type, the series recorded under the old kind are dropped.
#[derive(Debug)]
pub struct SeriesRegistry {
    component_id: String,
    nf_type: NfType,
    families: BTreeMap<FamilyKey, FamilyEntry>,
}

impl SeriesRegistry {
    pub fn new(component_id: impl Into<String>, nf_type: NfType) -> Self {
        Self {
            component_id: component_id.into(),
            nf_type,
            families: BTreeMap::new(),
        }
    }

    /// Record the values of a parsed payload, returning the number of samples applied
    ///
    /// Counters are relayed at the upstream's absolute value, since the
    /// upstream already accumulates them.
    pub fn ingest(&mut self, metrics: &[ParsedMetric]) -> usize {
        for metric in metrics {
            self.evict_other_kinds(&metric.name, metric.kind);
            let key = self.series_key(&metric.labels);
            let entry = self
                .families
                .entry(FamilyKey {
                    name: metric.name.clone(),
                    kind: metric.kind,
                })
                .or_default();

            if entry.help != metric.help {
                entry.help = metric.help.clone();
            }
            entry.series.insert(key, metric.value);
        }

        metrics.len()
    }

    fn evict_other_kinds(&mut self, name: &str, kind: MetricKind) {
        for other in [MetricKind::Gauge, MetricKind::Counter, MetricKind::Unknown] {
            if other == kind {
                continue;
            }
            let key = FamilyKey {
                name: name.to_string(),
                kind: other,
            };
            if self.families.remove(&key).is_some() {
                debug!(metric = %name, from = ?other, to = ?kind, "Upstream changed metric type");
            }
        }
    }

    /// Injected labels take precedence over upstream labels with the same name
    fn series_key(&self, labels: &Labels) -> SeriesKey {
        let mut key = Vec::with_capacity(labels.len() + 2);
        key.push((COMPONENT_ID_LABEL.to_string(), self.component_id.clone()));
        key.push((NF_TYPE_LABEL.to_string(), self.nf_type.as_str().to_string()));
        key.extend(
            labels
                .iter()
                .filter(|(name, _)| name.as_str() != COMPONENT_ID_LABEL && name.as_str() != NF_TYPE_LABEL)
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        key
    }

    /// Number of distinct metric families
    pub fn family_count(&self) -> usize {
        self.families.len()
    }

    /// Number of distinct labelled series across all families
    pub fn series_count(&self) -> usize {
        self.families.values().map(|f| f.series.len()).sum()
    }

    /// Current value of a series, looked up by its upstream labels
    pub fn value(&self, name: &str, kind: MetricKind, labels: &Labels) -> Option<f64> {
        let family = self.families.get(&FamilyKey {
            name: name.to_string(),
            kind,
        })?;
        family.series.get(&self.series_key(labels)).copied()
    }

    pub fn families(&self) -> Vec<MetricFamily> {
        self.families
            .iter()
            .filter_map(|(key, entry)| {
                let mut builder = FamilyBuilder::new(&key.name, &entry.help, key.kind);
                for (labels, value) in &entry.series {
                    builder.sample(labels, *value);
                }
                builder.build()
            })
            .collect()
    }

    /// Render every series in the text exposition format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        encode_text(&self.families())
    }
}
