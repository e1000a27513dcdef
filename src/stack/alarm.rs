//! Defines metric alarms and the metrics they watch.

use crate::stack::expr::Expr;
use crate::stack::template::{Resource, Template};
use crate::stack::Construct;
use anyhow::{bail, Result};
use serde_json::{json, Value};

/// How datapoints within a period are aggregated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Statistic {
    Sum,
    Average,
    Maximum,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Sum => "Sum",
            Statistic::Average => "Average",
            Statistic::Maximum => "Maximum",
        }
    }
}

/// A metric, aggregated over a period.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<(String, Expr)>,
    pub statistic: Statistic,
    pub period_seconds: u32,
}

impl Metric {
    /// Start an alarm on this metric. The alarm fires as soon as one
    /// period reaches the threshold, and missing data counts as
    /// healthy.
    pub fn create_alarm(&self, logical_id: impl Into<String>, threshold: f64) -> AlarmSpec {
        AlarmSpec {
            logical_id: logical_id.into(),
            metric: self.clone(),
            threshold,
            evaluation_periods: 1,
            comparison: Comparison::GreaterThanOrEqualToThreshold,
            treat_missing_data: TreatMissingData::NotBreaching,
            actions_enabled: true,
            description: None,
            alarm_actions: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    GreaterThanOrEqualToThreshold,
    GreaterThanThreshold,
    LessThanThreshold,
    LessThanOrEqualToThreshold,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::GreaterThanOrEqualToThreshold => "GreaterThanOrEqualToThreshold",
            Comparison::GreaterThanThreshold => "GreaterThanThreshold",
            Comparison::LessThanThreshold => "LessThanThreshold",
            Comparison::LessThanOrEqualToThreshold => "LessThanOrEqualToThreshold",
        }
    }

    fn breaches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThanOrEqualToThreshold => value >= threshold,
            Comparison::GreaterThanThreshold => value > threshold,
            Comparison::LessThanThreshold => value < threshold,
            Comparison::LessThanOrEqualToThreshold => value <= threshold,
        }
    }
}

/// What a period without datapoints means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreatMissingData {
    Breaching,
    NotBreaching,
    Ignore,
    Missing,
}

impl TreatMissingData {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreatMissingData::Breaching => "breaching",
            TreatMissingData::NotBreaching => "notBreaching",
            TreatMissingData::Ignore => "ignore",
            TreatMissingData::Missing => "missing",
        }
    }
}

/// A threshold alarm on a single metric.
#[derive(Clone, Debug, PartialEq)]
pub struct AlarmSpec {
    pub logical_id: String,
    pub metric: Metric,
    pub threshold: f64,
    pub evaluation_periods: u32,
    pub comparison: Comparison,
    pub treat_missing_data: TreatMissingData,
    pub actions_enabled: bool,
    pub description: Option<String>,
    pub alarm_actions: Vec<Expr>,
}

impl AlarmSpec {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn add_alarm_action(mut self, target: Expr) -> Self {
        self.alarm_actions.push(target);
        self
    }

    /// Whether the alarm would be in the alarm state after the given
    /// most recent periods, newest last. `None` marks a period with no
    /// data.
    pub fn fires(&self, periods: &[Option<f64>]) -> bool {
        let window = self.evaluation_periods as usize;
        if window == 0 || periods.len() < window {
            return false;
        }
        periods[periods.len() - window..]
            .iter()
            .all(|period| match period {
                Some(value) => self.comparison.breaches(*value, self.threshold),
                None => self.treat_missing_data == TreatMissingData::Breaching,
            })
    }
}

impl Construct for AlarmSpec {
    fn declare(&self, template: &mut Template) -> Result<()> {
        if self.evaluation_periods == 0 {
            bail!("alarm {:?} needs at least one evaluation period", self.logical_id);
        }
        let mut properties = json!({
            "Namespace": self.metric.namespace,
            "MetricName": self.metric.metric_name,
            "Dimensions": self
                .metric
                .dimensions
                .iter()
                .map(|(name, value)| json!({ "Name": name, "Value": value }))
                .collect::<Vec<_>>(),
            "Statistic": self.metric.statistic.as_str(),
            "Period": self.metric.period_seconds,
            "Threshold": self.threshold,
            "EvaluationPeriods": self.evaluation_periods,
            "ComparisonOperator": self.comparison.as_str(),
            "TreatMissingData": self.treat_missing_data.as_str(),
            "ActionsEnabled": self.actions_enabled,
            "AlarmActions": self.alarm_actions,
        });
        if let Some(description) = &self.description {
            properties["AlarmDescription"] = Value::String(description.clone());
        }
        template.add(
            &self.logical_id,
            Resource::new("AWS::CloudWatch::Alarm", properties),
        )
    }
}
