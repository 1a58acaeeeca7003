// weather_exporter - Prometheus metrics exporter for Netatmo and OpenWeather
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use parking_lot::RwLock;
use prometheus_client::encoding::text;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::collections::{HashMap, HashSet};
use std::error;
use std::fmt;
use std::sync::atomic::AtomicU64;

/// Label name and value pairs for a single series, in the order the owning table declares them.
pub type Labels = Vec<(String, String)>;

/// Floating point gauge, stored as the bits of an `f64` in an `AtomicU64`.
pub type FloatGauge = Gauge<f64, AtomicU64>;

/// Every series of a single metric, keyed by label values.
pub type GaugeFamily = Family<Labels, FloatGauge>;

#[derive(Debug)]
pub enum RegistrationError {
    Duplicate(String),
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate(name) => write!(f, "duplicate registration of metric {}", name),
        }
    }
}

impl error::Error for RegistrationError {}

/// One entry of a mapping table: a metric and how to compute its value from a decoded response.
pub struct MetricSpec<T> {
    pub subsystem: &'static str,
    pub name: &'static str,
    pub help: &'static str,
    pub value: fn(&T) -> f64,
}

impl<T> fmt::Debug for MetricSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricSpec")
            .field("subsystem", &self.subsystem)
            .field("name", &self.name)
            .field("help", &self.help)
            .finish()
    }
}

/// Static description of a metric: what `describe` hands to the scrape layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub name: String,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

/// Current value of one series at the time `collect` was called.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Labels,
    pub value: f64,
}

impl Sample {
    /// Value of the label `name`, if this sample has it.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

#[derive(Debug)]
struct Series {
    name: String,
    help: &'static str,
    family: GaugeFamily,
    // Handles to gauges already created in `family`. Gauges share their value with the
    // family so reads here see the same atomic that scrapes do.
    known: RwLock<HashMap<Labels, FloatGauge>>,
}

impl Series {
    fn new(name: String, help: &'static str) -> Self {
        Self {
            name,
            help,
            family: GaugeFamily::default(),
            known: RwLock::new(HashMap::new()),
        }
    }

    fn set(&self, labels: Labels, value: f64) {
        let gauge: FloatGauge = self.family.get_or_create(&labels).clone();
        gauge.set(value);

        if !self.known.read().contains_key(&labels) {
            self.known.write().entry(labels).or_insert(gauge);
        }
    }

    fn samples(&self) -> Vec<Sample> {
        self.known
            .read()
            .iter()
            .map(|(labels, gauge)| Sample {
                name: self.name.clone(),
                labels: labels.clone(),
                value: gauge.get(),
            })
            .collect()
    }
}

/// A fixed set of gauges that share a namespace and label names, each computed from `T`.
///
/// Metric names are `<namespace>_<subsystem>_<name>`. Label names are fixed when the table
/// is built, only values change afterwards. Series are never removed: a label combination
/// that stops being reported keeps its last value.
#[derive(Debug)]
pub struct GaugeTable<T> {
    labels: &'static [&'static str],
    entries: Vec<(MetricSpec<T>, Series)>,
}

impl<T> GaugeTable<T> {
    pub fn new(namespace: &str, labels: &'static [&'static str], specs: Vec<MetricSpec<T>>) -> Self {
        let entries = specs
            .into_iter()
            .map(|spec| {
                let name = format!("{}_{}_{}", namespace, spec.subsystem, spec.name);
                let series = Series::new(name, spec.help);
                (spec, series)
            })
            .collect();

        Self { labels, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn describe(&self) -> Vec<Descriptor> {
        self.entries
            .iter()
            .map(|(_, series)| Descriptor {
                name: series.name.clone(),
                help: series.help,
                labels: self.labels,
            })
            .collect()
    }

    /// Snapshot of every series written so far, sorted by name and then labels.
    pub fn collect(&self) -> Vec<Sample> {
        let mut out: Vec<Sample> = self.entries.iter().flat_map(|(_, series)| series.samples()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        out
    }

    /// Overwrite the value of the metric `name` for the given label values, creating the
    /// series if needed. Returns `false` if this table has no metric called `name`.
    pub fn set(&self, name: &str, values: &[&str], value: f64) -> bool {
        match self.entries.iter().find(|(_, series)| series.name == name) {
            Some((_, series)) => {
                series.set(self.labels_for(values), value);
                true
            }
            None => false,
        }
    }

    /// Run every extractor in the table against `data` and store the results under the
    /// given label values. Returns the number of series written.
    pub fn observe(&self, values: &[&str], data: &T) -> usize {
        let labels = self.labels_for(values);
        for (spec, series) in self.entries.iter() {
            series.set(labels.clone(), (spec.value)(data));
        }

        self.entries.len()
    }

    fn labels_for(&self, values: &[&str]) -> Labels {
        debug_assert_eq!(self.labels.len(), values.len(), "label values must match label names");
        self.labels
            .iter()
            .zip(values.iter())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    pub(crate) fn families(&self) -> impl Iterator<Item = (String, &'static str, GaugeFamily)> + '_ {
        self.entries
            .iter()
            .map(|(_, series)| (series.name.clone(), series.help, series.family.clone()))
    }
}

/// Explicitly constructed registry that every data source registers its gauges with and the
/// `/metrics` endpoint encodes from.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    registry: Registry,
    names: HashSet<String>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every gauge of one or more tables.
    ///
    /// All names are checked before anything is registered, so a duplicate leaves the
    /// registry unchanged.
    pub fn register<I>(&mut self, families: I) -> Result<(), RegistrationError>
    where
        I: IntoIterator<Item = (String, &'static str, GaugeFamily)>,
    {
        let families: Vec<_> = families.into_iter().collect();
        let mut pending = HashSet::with_capacity(families.len());

        for (name, _, _) in families.iter() {
            if self.names.contains(name) || !pending.insert(name.as_str()) {
                return Err(RegistrationError::Duplicate(name.clone()));
            }
        }

        for (name, help, family) in families {
            tracing::debug!(message = "registering metric", name = %name);
            self.registry.register(name.clone(), help, family);
            self.names.insert(name);
        }

        Ok(())
    }

    /// Names of all registered metrics.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|s| s.as_str())
    }

    /// Encode all registered metrics in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();
        text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}
