// InfluxDB v2 HTTP write API
//
// POST {url}/api/v2/write?org=..&bucket=..&precision=s
// Authorization: Token <token>
// Body: newline-separated line protocol, chunked by max_lines_per_request
//
// Rows are held until flush and rendered one request body at a time.

use async_trait::async_trait;
use gas2influx_config::SinkConfig;
use gas2influx_core::{NormalizedBatch, NormalizedRow};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{FlushAck, Sink, SinkWriter, WriteReceipt};
use crate::error::{Result, SinkError};
use crate::line_protocol::SeriesLayout;

const SINK_NAME: &str = "influxdb";

#[derive(Debug)]
struct Endpoint {
    write_url: String,
    org: String,
    bucket: String,
    token: String,
    max_lines: usize,
}

#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: reqwest::Client,
    endpoint: Arc<Endpoint>,
}

impl InfluxSink {
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SinkError::unavailable(SINK_NAME, e))?;

        let endpoint = Endpoint {
            write_url: write_url(&config.url),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            token: config.token.clone(),
            max_lines: config.max_lines_per_request.max(1),
        };
        debug!(url = %endpoint.write_url, bucket = %endpoint.bucket, "InfluxDB sink configured");

        Ok(Self {
            client,
            endpoint: Arc::new(endpoint),
        })
    }
}

impl Sink for InfluxSink {
    fn name(&self) -> &'static str {
        SINK_NAME
    }

    fn open(&self) -> Box<dyn SinkWriter> {
        Box::new(InfluxWriter {
            client: self.client.clone(),
            endpoint: Arc::clone(&self.endpoint),
            pending: Vec::new(),
        })
    }
}

struct InfluxWriter {
    client: reqwest::Client,
    endpoint: Arc<Endpoint>,
    pending: Vec<(SeriesLayout, Vec<NormalizedRow>)>,
}

impl InfluxWriter {
    /// Request bodies for everything pending, rendered on demand.
    fn bodies(&self) -> impl Iterator<Item = (usize, String)> + '_ {
        let max_lines = self.endpoint.max_lines;
        self.pending.iter().flat_map(move |(layout, rows)| {
            rows.chunks(max_lines)
                .map(move |chunk| (chunk.len(), layout.render_body(chunk)))
        })
    }

    async fn post(&self, body: String) -> Result<()> {
        let mut request = self
            .client
            .post(&self.endpoint.write_url)
            .query(&[
                ("org", self.endpoint.org.as_str()),
                ("bucket", self.endpoint.bucket.as_str()),
                ("precision", "s"),
            ])
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        if !self.endpoint.token.is_empty() {
            request = request.header(AUTHORIZATION, format!("Token {}", self.endpoint.token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::unavailable(SINK_NAME, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "InfluxDB rejected write");
        Err(SinkError::Rejected {
            sink: SINK_NAME,
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SinkWriter for InfluxWriter {
    async fn write(
        &mut self,
        batch: &NormalizedBatch,
        measurement: &str,
        tag_columns: &[String],
    ) -> Result<WriteReceipt> {
        let layout = SeriesLayout::new(measurement, tag_columns)?;
        let points = batch.rows.len();
        if points > 0 {
            self.pending.push((layout, batch.rows.clone()));
        }
        Ok(WriteReceipt { points })
    }

    async fn flush(&mut self) -> Result<FlushAck> {
        if self.pending.is_empty() {
            return Ok(FlushAck::default());
        }

        let mut ack = FlushAck::default();
        for (points, body) in self.bodies() {
            self.post(body).await?;
            ack.points += points;
            ack.requests += 1;
        }
        self.pending.clear();

        debug!(points = ack.points, requests = ack.requests, "InfluxDB flush acknowledged");
        Ok(ack)
    }
}

fn write_url(base: &str) -> String {
    format!("{}/api/v2/write", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use gas2influx_core::{FileRecord, NormalizedRow, MEASUREMENT_COUNT};

    fn one_row_batch() -> NormalizedBatch {
        NormalizedBatch::new(
            FileRecord::from_identifier("20240302.csv").unwrap(),
            vec![NormalizedRow {
                timestamp: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
                values: [1.0; MEASUREMENT_COUNT],
            }],
        )
    }

    #[test]
    fn write_url_tolerates_trailing_slash() {
        assert_eq!(
            write_url("http://localhost:8086/"),
            "http://localhost:8086/api/v2/write"
        );
        assert_eq!(
            write_url("https://influx.example.com"),
            "https://influx.example.com/api/v2/write"
        );
    }

    #[tokio::test]
    async fn pending_rows_render_in_bounded_chunks() {
        let mut batch = one_row_batch();
        for n in 1..5 {
            let mut row = batch.rows[0].clone();
            row.timestamp += chrono::Duration::seconds(n);
            batch.rows.push(row);
        }
        let config = SinkConfig {
            max_lines_per_request: 2,
            ..SinkConfig::default()
        };
        let sink = InfluxSink::new(&config).unwrap();
        let mut writer = InfluxWriter {
            client: sink.client.clone(),
            endpoint: Arc::clone(&sink.endpoint),
            pending: Vec::new(),
        };

        let receipt = writer.write(&batch, "gas", &[]).await.unwrap();
        assert_eq!(receipt.points, 5);

        let bodies: Vec<(usize, String)> = writer.bodies().collect();
        let sizes: Vec<usize> = bodies.iter().map(|(points, _)| *points).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        for (points, body) in &bodies {
            assert_eq!(body.lines().count(), *points);
        }
        assert!(bodies[2].1.ends_with(" 1709337604"));
    }

    #[tokio::test]
    async fn empty_flush_sends_nothing() {
        let config = SinkConfig {
            // Nothing listens here; an empty flush must not notice
            url: "http://127.0.0.1:9".to_string(),
            ..SinkConfig::default()
        };
        let sink = InfluxSink::new(&config).unwrap();
        let mut writer = sink.open();
        let ack = writer.flush().await.unwrap();
        assert_eq!(ack, FlushAck::default());
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let config = SinkConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..SinkConfig::default()
        };
        let sink = InfluxSink::new(&config).unwrap();
        let mut writer = sink.open();

        let receipt = writer
            .write(&one_row_batch(), "gas", &["Temperature (C)".to_string()])
            .await
            .unwrap();
        assert_eq!(receipt.points, 1);

        let err = writer.flush().await.unwrap_err();
        assert!(matches!(err, SinkError::Unavailable { .. }));
        assert_eq!(err.code().as_str(), "E005");
    }
}
