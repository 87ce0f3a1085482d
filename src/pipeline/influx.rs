//! InfluxDB v2 telemetry source.
//!
//! Readings are written by the plant gateway as one point per sample with
//! the six features as fields and `machine_id` as a tag. We pivot fields into
//! columns server-side and parse the CSV response.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::source::{SourceError, TelemetrySource};
use crate::config::InfluxConfig;
use crate::config::defaults::INFLUX_SECS_PER_POINT;
use crate::types::{FeatureVector, FEATURE_NAMES, NUM_FEATURES};

pub struct InfluxSource {
    http: reqwest::Client,
    query_url: String,
    org: String,
    token: String,
    bucket: String,
    measurement: String,
    machine_id: String,
    min_range_minutes: u64,
}

impl InfluxSource {
    pub fn new(config: &InfluxConfig, machine_id: impl Into<String>) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            query_url: format!("{}/api/v2/query", config.url.trim_end_matches('/')),
            org: config.org.clone(),
            token: config.token.clone(),
            bucket: config.bucket.clone(),
            measurement: config.measurement.clone(),
            machine_id: machine_id.into(),
            min_range_minutes: config.min_range_minutes,
        })
    }

    /// Look-back window in minutes: wide enough for `n` points at the
    /// gateway's write rate, never narrower than the configured floor.
    pub fn range_minutes(&self, n: usize) -> u64 {
        let needed = (n as u64).saturating_mul(INFLUX_SECS_PER_POINT) / 60;
        needed.max(self.min_range_minutes)
    }

    /// Flux query returning the newest `n` pivoted rows in time order.
    pub fn flux_query(&self, n: usize) -> String {
        format!(
            r#"from(bucket: "{bucket}")
  |> range(start: -{range}m)
  |> filter(fn: (r) => r["_measurement"] == "{measurement}")
  |> filter(fn: (r) => r["machine_id"] == "{machine}")
  |> pivot(rowKey: ["_time"], columnKey: ["_field"], valueColumn: "_value")
  |> sort(columns: ["_time"], desc: false)
  |> tail(n: {n})"#,
            bucket = escape_flux(&self.bucket),
            range = self.range_minutes(n),
            measurement = escape_flux(&self.measurement),
            machine = escape_flux(&self.machine_id),
        )
    }
}

fn escape_flux(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl TelemetrySource for InfluxSource {
    async fn query_last_n(&self, n: usize) -> Result<Vec<FeatureVector>, SourceError> {
        let resp = self
            .http
            .post(&self.query_url)
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(self.flux_query(n))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Status { status, body });
        }

        let text = resp.text().await?;
        let mut readings = parse_query_csv(&text, &self.machine_id);
        if readings.len() > n {
            readings.drain(..readings.len() - n);
        }
        debug!(requested = n, returned = readings.len(), "InfluxDB query complete");
        if readings.is_empty() {
            warn!(
                machine = %self.machine_id,
                range_minutes = self.range_minutes(n),
                "No telemetry found in query window"
            );
        }
        Ok(readings)
    }

    fn source_name(&self) -> &str {
        "InfluxDB"
    }
}

/// Parse an InfluxDB CSV query response into time-ordered readings.
///
/// Annotation lines (`#...`) and blank lines are skipped. A row containing a
/// `_time` column starts a new table header. Absent or empty feature fields
/// read as 0.0; rows with an unparsable time or value are dropped. Duplicate
/// timestamps across tables keep the first occurrence.
pub fn parse_query_csv(text: &str, machine_id: &str) -> Vec<FeatureVector> {
    let mut header: Option<HashMap<&str, usize>> = None;
    let mut readings = Vec::new();

    for (line_num, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.contains(&"_time") {
            header = Some(fields.iter().enumerate().map(|(i, f)| (*f, i)).collect());
            continue;
        }
        let Some(columns) = header.as_ref() else {
            continue;
        };

        match parse_record(&fields, columns, machine_id) {
            Ok(fv) => readings.push(fv),
            Err(e) => warn!(line = line_num + 1, error = %e, "Skipping malformed telemetry row"),
        }
    }

    readings.sort_by_key(|fv| fv.timestamp);
    readings.dedup_by_key(|fv| fv.timestamp);
    readings
}

fn parse_record(fields: &[&str], columns: &HashMap<&str, usize>, machine_id: &str) -> Result<FeatureVector, String> {
    let time = columns
        .get("_time")
        .and_then(|&i| fields.get(i))
        .ok_or_else(|| "missing _time".to_string())?;
    let timestamp = DateTime::parse_from_rfc3339(time)
        .map_err(|e| format!("bad _time '{time}': {e}"))?
        .with_timezone(&Utc);

    let mut row = [0.0; NUM_FEATURES];
    for (slot, name) in row.iter_mut().zip(FEATURE_NAMES) {
        let raw = columns.get(name).and_then(|&i| fields.get(i)).map_or("", |s| s.trim());
        if !raw.is_empty() {
            *slot = raw.parse::<f64>().map_err(|e| format!("bad {name} '{raw}': {e}"))?;
        }
    }
    Ok(FeatureVector::from_row(timestamp, machine_id, row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;

    const RESPONSE: &str = "\
,result,table,_start,_stop,_time,_measurement,machine_id,accX,accY,accZ,current,tempA,tempB\r
,_result,0,2024-05-01T09:00:00Z,2024-05-01T11:00:00Z,2024-05-01T10:00:10Z,machine_metrics,m-1,-0.4,-0.3,9.8,7.5,41.0,39.0\r
,_result,0,2024-05-01T09:00:00Z,2024-05-01T11:00:00Z,2024-05-01T10:00:00Z,machine_metrics,m-1,-0.5,-0.2,9.7,7.0,40.0,38.5\r
,_result,0,2024-05-01T09:00:00Z,2024-05-01T11:00:00Z,2024-05-01T10:00:20Z,machine_metrics,m-1,oops,-0.2,9.7,7.0,40.0,38.5\r
\r
,result,table,_start,_stop,_time,_measurement,machine_id,current,tempA\r
,_result,1,2024-05-01T09:00:00Z,2024-05-01T11:00:00Z,2024-05-01T10:00:30Z,machine_metrics,m-1,8.0,\r
";

    fn config(url: &str) -> InfluxConfig {
        InfluxConfig {
            url: url.to_string(),
            org: "plant".to_string(),
            bucket: "sensors".to_string(),
            token: "secret".to_string(),
            ..InfluxConfig::default()
        }
    }

    #[test]
    fn test_flux_query_shape() {
        let source = InfluxSource::new(&config("http://localhost:8086"), "m-1").unwrap();
        let flux = source.flux_query(240);
        assert!(flux.contains(r#"from(bucket: "sensors")"#));
        assert!(flux.contains("range(start: -120m)"));
        assert!(flux.contains(r#"r["machine_id"] == "m-1""#));
        assert!(flux.contains(r#"r["_measurement"] == "machine_metrics""#));
        assert!(flux.ends_with("tail(n: 240)"));
    }

    #[test]
    fn test_range_grows_with_point_count() {
        let source = InfluxSource::new(&config("http://localhost:8086"), "m-1").unwrap();
        assert_eq!(source.range_minutes(240), 120);
        assert_eq!(source.range_minutes(1_000), 250);
    }

    #[test]
    fn test_parse_sorts_and_fills_missing() {
        let readings = parse_query_csv(RESPONSE, "m-1");
        assert_eq!(readings.len(), 3);
        assert!(readings.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(readings[0].current, 7.0);
        assert_eq!(readings[1].temp_a, 41.0);
        assert_eq!(readings[1].acc_x, -0.4);
        // second table lacks most fields and has a blank tempA
        assert_eq!(readings[2].values(), [8.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_parse_empty_response() {
        assert!(parse_query_csv("", "m-1").is_empty());
        assert!(parse_query_csv("#datatype,string\r\n\r\n", "m-1").is_empty());
    }

    async fn spawn_influx(status: StatusCode) -> String {
        let app = Router::new().route(
            "/api/v2/query",
            post(move |headers: HeaderMap, body: String| async move {
                let authorized = headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Token secret");
                if !authorized || !body.contains("tail(n: 2)") {
                    return (StatusCode::UNAUTHORIZED, String::new());
                }
                (status, RESPONSE.to_string())
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_query_keeps_newest_n() {
        let url = spawn_influx(StatusCode::OK).await;
        let source = InfluxSource::new(&config(&url), "m-1").unwrap();
        let readings = source.query_last_n(2).await.unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[1].current, 8.0);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let url = spawn_influx(StatusCode::INTERNAL_SERVER_ERROR).await;
        let source = InfluxSource::new(&config(&url), "m-1").unwrap();
        let result = source.query_last_n(2).await;
        assert!(matches!(result, Err(SourceError::Status { status, .. }) if status == StatusCode::INTERNAL_SERVER_ERROR));
    }
}
