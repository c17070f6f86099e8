//! Metric value type carried between producers, aggregators and sinks.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of measurement a metric carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    /// Monotonic increments accumulated between flushes.
    Counter,
    /// Most-recent value wins.
    Gauge,
}

/// The measured value. Counters are integral, gauges are floating point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    /// Accumulated counter total.
    Counter(i64),
    /// Last observed gauge value.
    Gauge(f64),
}

impl MetricValue {
    /// The kind this value belongs to.
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Counter(v) => write!(f, "{v}"),
            MetricValue::Gauge(v) => write!(f, "{v}"),
        }
    }
}

/// One measurement emitted by an aggregator or a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name, e.g. `nb-record-saved`.
    pub name: String,
    /// Optional key/value tags, kept sorted for stable rendering.
    pub tags: BTreeMap<String, String>,
    /// When the measurement was taken.
    pub timestamp: DateTime<Utc>,
    /// The measured value.
    pub value: MetricValue,
}

impl Metric {
    /// A counter measurement taken now.
    pub fn counter(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            timestamp: Utc::now(),
            value: MetricValue::Counter(value),
        }
    }

    /// A gauge measurement taken now.
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            timestamp: Utc::now(),
            value: MetricValue::Gauge(value),
        }
    }

    /// Attach a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// The kind of this metric.
    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "metric name: {}", self.name)?;
        if !self.tags.is_empty() {
            let tags: Vec<String> = self
                .tags
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, " tags: {}", tags.join(" "))?;
        }
        write!(f, " at {} value = {}", self.timestamp, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_value() {
        assert_eq!(Metric::counter("c", 1).kind(), MetricKind::Counter);
        assert_eq!(Metric::gauge("g", 1.0).kind(), MetricKind::Gauge);
    }

    #[test]
    fn test_display_includes_tags() {
        let metric = Metric::counter("nb-record", 3).with_tag("zone", "rock.");
        let rendered = metric.to_string();

        assert!(rendered.contains("nb-record"));
        assert!(rendered.contains("zone=rock."));
        assert!(rendered.contains("value = 3"));
    }
}
