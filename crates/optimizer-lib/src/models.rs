//! Core data models for the resource optimizer
//!
//! Field names on the serialized forms match the persisted profile
//! resource (`cpuThresholds`, `lastAction.type`, ...), so these types
//! round-trip through the profile store unchanged.

use crate::error::ValidationError;
use crate::quantity::CpuQuantity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Status key under which the representative cpu value is reported
pub const CPU_USAGE_METRIC: &str = "cpu_usage";

/// Marker written instead of a percentage when a cycle saw no samples
pub const NO_DATA_MARKER: &str = "no_data";

/// Utilization range considered acceptable, in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min: i32,
    pub max: i32,
}

impl Thresholds {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Reject out-of-range or inverted thresholds
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [("min", self.min), ("max", self.max)] {
            if !(1..=100).contains(&value) {
                return Err(ValidationError::ThresholdOutOfRange { field, value });
            }
        }
        if self.min >= self.max {
            return Err(ValidationError::InvertedThresholds { min: self.min, max: self.max });
        }
        Ok(())
    }

    /// Centre of the goldilocks zone
    pub fn midpoint(&self) -> f64 {
        (f64::from(self.min) + f64::from(self.max)) / 2.0
    }

    pub fn is_inverted(&self) -> bool {
        self.min > self.max
    }
}

/// How a profile reacts when utilization leaves the goldilocks zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    /// Add or remove one replica
    Scale,
    /// Recompute the cpu request of the first container declaring one
    Resize,
    /// Only publish advisory recommendations
    Recommend,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Scale => "Scale",
            PolicyKind::Resize => "Resize",
            PolicyKind::Recommend => "Recommend",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Scale" => Ok(PolicyKind::Scale),
            "Resize" => Ok(PolicyKind::Resize),
            "Recommend" => Ok(PolicyKind::Recommend),
            other => Err(ValidationError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Kind of action persisted in `lastAction.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    ScaleUp,
    ScaleDown,
    ResizeUp,
    ResizeDown,
    /// No-op marker, distinct from a profile that never acted
    DoNothing,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ScaleUp => "ScaleUp",
            ActionKind::ScaleDown => "ScaleDown",
            ActionKind::ResizeUp => "ResizeUp",
            ActionKind::ResizeDown => "ResizeDown",
            ActionKind::DoNothing => "DoNothing",
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, ActionKind::DoNothing)
    }

    pub fn is_horizontal(&self) -> bool {
        matches!(self, ActionKind::ScaleUp | ActionKind::ScaleDown)
    }

    pub fn is_vertical(&self) -> bool {
        matches!(self, ActionKind::ResizeUp | ActionKind::ResizeDown)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The last real action taken for a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl ActionRecord {
    pub fn new(kind: ActionKind, timestamp: DateTime<Utc>, details: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp,
            details: details.into(),
        }
    }
}

/// Persisted status subresource of a profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStatus {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub observed_metrics: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<ActionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

/// Equality-based label selector; matching itself happens in the workload store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn from_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            match_labels: labels.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }

    /// Render as `k=v,k2=v2` for API list calls
    pub fn to_query(&self) -> String {
        self.match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Declarative optimization settings of a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSpec {
    #[serde(default)]
    pub selector: LabelSelector,
    pub cpu_thresholds: Thresholds,
    pub optimization_policy: PolicyKind,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_duration",
        deserialize_with = "deserialize_opt_duration"
    )]
    pub cooldown_period: Option<Duration>,
    #[serde(default, rename = "minCPU", skip_serializing_if = "Option::is_none")]
    pub min_cpu: Option<CpuQuantity>,
    #[serde(default, rename = "maxCPU", skip_serializing_if = "Option::is_none")]
    pub max_cpu: Option<CpuQuantity>,
}

impl ProfileSpec {
    pub fn new(selector: LabelSelector, cpu_thresholds: Thresholds, policy: PolicyKind) -> Self {
        Self {
            selector,
            cpu_thresholds,
            optimization_policy: policy,
            cooldown_period: None,
            min_cpu: None,
            max_cpu: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.cpu_thresholds.validate()
    }
}

/// Namespaced identity of a profile
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileKey {
    pub namespace: String,
    pub name: String,
}

impl ProfileKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A profile as read from the profile store at the start of a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub key: ProfileKey,
    pub spec: ProfileSpec,
    #[serde(default)]
    pub status: ProfileStatus,
    /// Opaque version used for optimistic concurrency on status writes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl Profile {
    pub fn new(key: ProfileKey, spec: ProfileSpec) -> Self {
        Self {
            key,
            spec,
            status: ProfileStatus::default(),
            resource_version: None,
        }
    }
}

/// One utilization reading, in percent of the requested cpu
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedSample {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ObservedSample {
    pub fn new(value: f64) -> Self {
        Self { value, source: None }
    }

    pub fn labelled(value: f64, source: impl Into<String>) -> Self {
        Self {
            value,
            source: Some(source.into()),
        }
    }
}

/// Workload controllers the optimizer knows how to scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Deployment => f.write_str("Deployment"),
            WorkloadKind::StatefulSet => f.write_str("StatefulSet"),
        }
    }
}

/// Cpu request of one container in a workload's pod template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResources {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<CpuQuantity>,
    /// Declared request that is not a valid cpu quantity, verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unparsed_cpu_request: Option<String>,
}

impl ContainerResources {
    pub fn new(name: impl Into<String>, cpu_request: Option<CpuQuantity>) -> Self {
        Self {
            name: name.into(),
            cpu_request,
            unparsed_cpu_request: None,
        }
    }

    /// Container whose declared request could not be parsed
    pub fn unparsed(name: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cpu_request: None,
            unparsed_cpu_request: Some(raw.into()),
        }
    }

    pub fn declares_cpu_request(&self) -> bool {
        self.cpu_request.is_some() || self.unparsed_cpu_request.is_some()
    }
}

/// Read-only snapshot of a scalable workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalableWorkload {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Desired replicas; absent means the controller default of one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub containers: Vec<ContainerResources>,
}

impl ScalableWorkload {
    pub fn current_replicas(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }

    /// First container, in declaration order, that declares a cpu request,
    /// whether or not the declared value parses
    pub fn first_cpu_container(&self) -> Option<(usize, &ContainerResources)> {
        self.containers
            .iter()
            .enumerate()
            .find(|(_, c)| c.declares_cpu_request())
    }

    pub fn reference(&self) -> WorkloadRef {
        WorkloadRef {
            kind: self.kind,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// Identity of a workload in outcome reports
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Parse a duration such as `"5m"`, `"90s"`, `"1h30m"` or `"250ms"`
pub fn parse_duration(s: &str) -> Result<Duration, ValidationError> {
    let invalid = || ValidationError::InvalidDuration(s.to_string());
    let mut rest = s.trim();
    if rest.is_empty() {
        return Err(invalid());
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_secs = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 0.001,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        let part = Duration::try_from_secs_f64(value * unit_secs).map_err(|_| invalid())?;
        total = total.checked_add(part).ok_or_else(invalid)?;
    }
    Ok(total)
}

/// Format a duration in the same notation `parse_duration` accepts
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let millis = d.subsec_millis();
    if total == 0 {
        return if millis == 0 { "0s".to_string() } else { format!("{}ms", millis) };
    }

    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 || millis > 0 {
        if millis > 0 {
            out.push_str(&format!("{}.{:03}s", s, millis));
        } else {
            out.push_str(&format!("{}s", s));
        }
    }
    out
}

fn serialize_opt_duration<S: Serializer>(
    d: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => serializer.serialize_str(&format_duration(*d)),
        None => serializer.serialize_none(),
    }
}

fn deserialize_opt_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}
