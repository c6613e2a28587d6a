//! Metrics source backed by the Prometheus HTTP query API

use super::{async_trait, MetricsSource};
use crate::error::SourceError;
use crate::models::{LabelSelector, ObservedSample, Profile};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Per-pod cpu usage as a percentage of the pod's cpu request, restricted to
/// pods whose labels match the profile selector.
///
/// `{namespace}` is replaced by the profile namespace and `{selector}` by
/// the output of [`render_selector_matchers`].
pub const DEFAULT_CPU_QUERY: &str = concat!(
    "(sum by (pod) (rate(container_cpu_usage_seconds_total",
    "{namespace=\"{namespace}\", container!=\"\"}[5m]))",
    " / sum by (pod) (kube_pod_container_resource_requests",
    "{resource=\"cpu\", namespace=\"{namespace}\", container!=\"\"}))",
    " * 100",
    " * on (pod) group_left() max by (pod) (kube_pod_labels{namespace=\"{namespace}\"{selector}})"
);

/// Render `matchLabels` as kube-state-metrics `label_*` matchers, each
/// prefixed with `, ` so the result can follow an existing matcher.
pub fn render_selector_matchers(selector: &LabelSelector) -> String {
    selector
        .match_labels
        .iter()
        .map(|(key, value)| {
            let name: String = key
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            let value = value.replace('\\', "\\\\").replace('"', "\\\"");
            format!(", label_{}=\"{}\"", name, value)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<VectorSample>),
    Scalar(SampleValue),
    Matrix(serde_json::Value),
    String(serde_json::Value),
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: SampleValue,
}

/// `[<unix seconds>, "<value>"]`
#[derive(Debug, Deserialize)]
struct SampleValue(f64, String);

impl SampleValue {
    fn parse(&self) -> Result<f64, SourceError> {
        self.1
            .parse::<f64>()
            .map_err(|_| SourceError::Decode(format!("sample value {:?} is not a number", self.1)))
    }
}

/// Decode the body of a `/api/v1/query` response into samples.
///
/// Vector results give one sample per series, labelled with its `pod`.
/// Scalar results give one unlabelled sample. Other result types give none.
pub fn decode_query_response(body: &[u8]) -> Result<Vec<ObservedSample>, SourceError> {
    let response: QueryResponse = serde_json::from_slice(body)
        .map_err(|e| SourceError::Decode(format!("invalid query response: {}", e)))?;

    if response.status != "success" {
        return Err(SourceError::Transport(format!(
            "query failed ({}): {}",
            response.error_type.as_deref().unwrap_or("unknown"),
            response.error.as_deref().unwrap_or("no error message")
        )));
    }
    if !response.warnings.is_empty() {
        warn!(warnings = ?response.warnings, "Prometheus query returned warnings");
    }

    match response.data {
        Some(QueryData::Vector(series)) => series
            .iter()
            .map(|s| {
                let value = s.value.parse()?;
                Ok(match s.metric.get("pod") {
                    Some(pod) => ObservedSample::labelled(value, pod.clone()),
                    None => ObservedSample::new(value),
                })
            })
            .collect(),
        Some(QueryData::Scalar(sample)) => Ok(vec![ObservedSample::new(sample.parse()?)]),
        Some(QueryData::Matrix(_)) | Some(QueryData::String(_)) | None => {
            warn!("Prometheus query did not return a vector");
            Ok(Vec::new())
        }
    }
}

/// Queries a Prometheus server for per-pod cpu utilization
pub struct PrometheusSource {
    client: Client,
    query_url: Url,
    template: String,
}

impl PrometheusSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let invalid_url = |e: url::ParseError| {
            SourceError::Rejected(format!("invalid prometheus url {:?}: {}", base_url, e))
        };
        let mut base = Url::parse(base_url).map_err(invalid_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let query_url = base.join("api/v1/query").map_err(invalid_url)?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport(format!("failed to create http client: {}", e)))?;

        Ok(Self {
            client,
            query_url,
            template: DEFAULT_CPU_QUERY.to_string(),
        })
    }

    /// Replace the query template
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn query_url(&self) -> &Url {
        &self.query_url
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    fn expression(&self, profile: &Profile) -> String {
        self.template
            .replace("{namespace}", &profile.key.namespace)
            .replace("{selector}", &render_selector_matchers(&profile.spec.selector))
    }

    async fn query(
        &self,
        expression: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ObservedSample>, SourceError> {
        let time = format!("{:.3}", at.timestamp_millis() as f64 / 1000.0);
        debug!(url = %self.query_url, query = %expression, time = %time, "Querying Prometheus");

        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", expression), ("time", time.as_str())])
            .send()
            .await
            .map_err(|e| SourceError::Transport(format!("prometheus request failed: {}", e)))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            SourceError::Transport(format!("failed to read prometheus response: {}", e))
        })?;

        if !status.is_success() {
            // Prometheus reports query errors with a JSON body and a 4xx/5xx status.
            if let Err(e @ SourceError::Transport(_)) = decode_query_response(&body) {
                return Err(e);
            }
            return Err(SourceError::Transport(format!(
                "prometheus returned {}: {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }

        decode_query_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PolicyKind, ProfileKey, ProfileSpec, Thresholds};

    #[test]
    fn test_decode_vector() {
        let body = br#"{"status":"success","data":{"resultType":"vector","result":[
            {"metric":{"pod":"web-1"},"value":[1700000000.0,"42.5"]},
            {"metric":{"pod":"web-2"},"value":[1700000000.0,"17"]}
        ]}}"#;
        let samples = decode_query_response(body).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], ObservedSample::labelled(42.5, "web-1"));
        assert_eq!(samples[1].value, 17.0);
    }

    #[test]
    fn test_decode_scalar() {
        let body =
            br#"{"status":"success","data":{"resultType":"scalar","result":[1700000000.0,"3.5"]}}"#;
        assert_eq!(decode_query_response(body).unwrap(), vec![ObservedSample::new(3.5)]);
    }

    #[test]
    fn test_decode_empty_vector_and_matrix() {
        let empty = br#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;
        assert!(decode_query_response(empty).unwrap().is_empty());

        let matrix = br#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#;
        assert!(decode_query_response(matrix).unwrap().is_empty());
    }

    #[test]
    fn test_decode_error_status() {
        let body = br#"{"status":"error","errorType":"bad_data","error":"parse error at char 3"}"#;
        let err = decode_query_response(body).unwrap_err();
        assert!(matches!(err, SourceError::Transport(ref msg) if msg.contains("bad_data")));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode_query_response(b"<html>"), Err(SourceError::Decode(_))));

        let bad_value =
            br#"{"status":"success","data":{"resultType":"scalar","result":[1.0,"abc"]}}"#;
        assert!(matches!(decode_query_response(bad_value), Err(SourceError::Decode(_))));
    }

    #[test]
    fn test_render_selector_matchers() {
        let selector =
            LabelSelector::from_labels([("app.kubernetes.io/name", "web"), ("tier", "a\"b")]);
        assert_eq!(
            render_selector_matchers(&selector),
            ", label_app_kubernetes_io_name=\"web\", label_tier=\"a\\\"b\""
        );
        assert_eq!(render_selector_matchers(&LabelSelector::default()), "");
    }

    #[test]
    fn test_expression_fills_template() {
        let source = PrometheusSource::new("http://prometheus:9090", Duration::from_secs(5))
            .unwrap()
            .with_template("up{namespace=\"{namespace}\"{selector}}");
        let profile = Profile::new(
            ProfileKey::new("shop", "web"),
            ProfileSpec::new(
                LabelSelector::from_labels([("app", "web")]),
                Thresholds::new(20, 60),
                PolicyKind::Scale,
            ),
        );
        assert_eq!(source.expression(&profile), "up{namespace=\"shop\", label_app=\"web\"}");
    }

    #[test]
    fn test_query_url_keeps_base_path() {
        let timeout = Duration::from_secs(5);
        let source = PrometheusSource::new("http://gateway/prometheus", timeout).unwrap();
        assert_eq!(source.query_url().as_str(), "http://gateway/prometheus/api/v1/query");

        let source = PrometheusSource::new("http://prometheus:9090", timeout).unwrap();
        assert_eq!(source.query_url().as_str(), "http://prometheus:9090/api/v1/query");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            PrometheusSource::new("not a url", Duration::from_secs(5)),
            Err(SourceError::Rejected(_))
        ));
    }
}
