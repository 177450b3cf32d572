//! Metric and hyperparameter attachments for pending artifacts.

use crate::artifact::{ArtifactRef, ArtifactVersioner};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A metric is either a single scalar or a per-epoch sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    Series(Vec<f64>),
}

impl MetricValue {
    /// Append `other`, turning a scalar into a series when needed.
    pub fn extend(&mut self, other: MetricValue) {
        let mut values = match std::mem::replace(self, MetricValue::Series(Vec::new())) {
            MetricValue::Scalar(v) => vec![v],
            MetricValue::Series(vs) => vs,
        };
        match other {
            MetricValue::Scalar(v) => values.push(v),
            MetricValue::Series(vs) => values.extend(vs),
        }
        *self = MetricValue::Series(values);
    }

    /// Most recent value.
    pub fn last(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            MetricValue::Series(vs) => vs.last().copied(),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Scalar(v)
    }
}

impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        MetricValue::Scalar(f64::from(v))
    }
}

impl From<Vec<f64>> for MetricValue {
    fn from(vs: Vec<f64>) -> Self {
        MetricValue::Series(vs)
    }
}

/// A hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

pub type MetricSet = BTreeMap<String, MetricValue>;
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Merge `incoming` metrics into `target`; repeated keys accumulate.
pub fn append_metrics(target: &mut MetricSet, incoming: MetricSet) {
    for (key, value) in incoming {
        match target.get_mut(&key) {
            Some(existing) => existing.extend(value),
            None => {
                target.insert(key, value);
            }
        }
    }
}

/// Merge `incoming` params into `target`; the latest value wins.
pub fn merge_params(target: &mut ParamSet, incoming: ParamSet) {
    target.extend(incoming);
}

/// Logging handle bound to one pending artifact, handed to node callables
/// during a sink run.
#[derive(Clone, Copy)]
pub struct RunLogger<'a> {
    versioner: &'a ArtifactVersioner,
    target: &'a ArtifactRef,
}

impl<'a> RunLogger<'a> {
    pub fn new(versioner: &'a ArtifactVersioner, target: &'a ArtifactRef) -> Self {
        Self { versioner, target }
    }

    pub fn target(&self) -> &'a ArtifactRef {
        self.target
    }

    pub fn attach(&self, metrics: MetricSet, params: ParamSet) -> Result<()> {
        self.versioner.attach(self.target, metrics, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_extend_promotes_scalar() {
        let mut m = MetricValue::Scalar(0.5);
        m.extend(MetricValue::Scalar(0.4));
        assert_eq!(m, MetricValue::Series(vec![0.5, 0.4]));
        m.extend(MetricValue::Series(vec![0.3, 0.2]));
        assert_eq!(m, MetricValue::Series(vec![0.5, 0.4, 0.3, 0.2]));
        assert_eq!(m.last(), Some(0.2));
    }

    #[test]
    fn test_append_metrics_and_params() {
        let mut metrics = MetricSet::new();
        metrics.insert("loss".into(), 0.9.into());
        let mut incoming = MetricSet::new();
        incoming.insert("loss".into(), 0.7.into());
        incoming.insert("accuracy".into(), 0.8.into());
        append_metrics(&mut metrics, incoming);
        assert_eq!(metrics["loss"], MetricValue::Series(vec![0.9, 0.7]));
        assert_eq!(metrics["accuracy"], MetricValue::Scalar(0.8));

        let mut params = ParamSet::new();
        params.insert("lr".into(), 0.1.into());
        let mut newer = ParamSet::new();
        newer.insert("lr".into(), 0.01.into());
        newer.insert("optimizer".into(), "adam".into());
        merge_params(&mut params, newer);
        assert_eq!(params["lr"], ParamValue::Float(0.01));
        assert_eq!(params["optimizer"], ParamValue::Text("adam".into()));
    }

    #[test]
    fn test_metric_serde_shape() {
        let scalar = serde_json::to_value(MetricValue::Scalar(1.5)).unwrap();
        assert_eq!(scalar, serde_json::json!(1.5));
        let series: MetricValue = serde_json::from_value(serde_json::json!([0.1, 0.2])).unwrap();
        assert_eq!(series, MetricValue::Series(vec![0.1, 0.2]));
        let param: ParamValue = serde_json::from_value(serde_json::json!(32)).unwrap();
        assert_eq!(param, ParamValue::Int(32));
    }
}
