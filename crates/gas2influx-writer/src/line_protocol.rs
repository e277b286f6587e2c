// InfluxDB line protocol rendering
//
// measurement,tag=value field=value,field=value <unix seconds>
//
// Tag values are the measurement rendered as text; every non-tag measurement
// becomes a float field.

use gas2influx_core::schema::measurement_index;
use gas2influx_core::{NormalizedBatch, NormalizedRow, MEASUREMENT_COLUMNS};
use std::fmt::Write as _;

use crate::error::{Result, SinkError};

/// Column split resolved once per batch.
#[derive(Debug, Clone)]
pub struct SeriesLayout {
    measurement: String,
    /// (column index, escaped key)
    tags: Vec<(usize, String)>,
    fields: Vec<(usize, String)>,
}

impl SeriesLayout {
    pub fn new(measurement: &str, tag_columns: &[String]) -> Result<Self> {
        if measurement.is_empty() {
            return Err(SinkError::Schema {
                measurement: measurement.to_string(),
                reason: "measurement name is empty".to_string(),
            });
        }

        let mut tags = Vec::with_capacity(tag_columns.len());
        for column in tag_columns {
            let idx = measurement_index(column).ok_or_else(|| SinkError::Schema {
                measurement: measurement.to_string(),
                reason: format!("tag column '{column}' is not a measurement column"),
            })?;
            tags.push((idx, escape_key(column)));
        }
        // Line protocol wants tags sorted by key for best write performance
        tags.sort_by(|a, b| a.1.cmp(&b.1));

        let fields: Vec<(usize, String)> = MEASUREMENT_COLUMNS
            .iter()
            .enumerate()
            .filter(|(idx, _)| !tags.iter().any(|(tag_idx, _)| tag_idx == idx))
            .map(|(idx, name)| (idx, escape_key(name)))
            .collect();
        if fields.is_empty() {
            return Err(SinkError::Schema {
                measurement: measurement.to_string(),
                reason: "every column is a tag; at least one field is required".to_string(),
            });
        }

        Ok(Self {
            measurement: escape_measurement(measurement),
            tags,
            fields,
        })
    }

    /// Render every row of `batch` as one line each.
    pub fn render(&self, batch: &NormalizedBatch) -> Vec<String> {
        batch
            .rows
            .iter()
            .map(|row| {
                let mut line = String::with_capacity(self.line_capacity());
                self.render_row(row, &mut line);
                line
            })
            .collect()
    }

    /// Render `rows` as one newline-separated request body.
    pub fn render_body(&self, rows: &[NormalizedRow]) -> String {
        let mut body = String::with_capacity(rows.len() * (self.line_capacity() + 1));
        for (n, row) in rows.iter().enumerate() {
            if n > 0 {
                body.push('\n');
            }
            self.render_row(row, &mut body);
        }
        body
    }

    fn line_capacity(&self) -> usize {
        64 + self.fields.len() * 24
    }

    fn render_row(&self, row: &NormalizedRow, out: &mut String) {
        out.push_str(&self.measurement);
        for (idx, key) in &self.tags {
            let value = escape_key(&row.values[*idx].to_string());
            let _ = write!(out, ",{}={}", key, value);
        }
        for (n, (idx, key)) in self.fields.iter().enumerate() {
            let sep = if n == 0 { ' ' } else { ',' };
            let _ = write!(out, "{}{}={}", sep, key, row.values[*idx]);
        }
        let _ = write!(out, " {}", row.timestamp.timestamp());
    }
}

/// Render a batch directly; see [`SeriesLayout`].
pub fn render_lines(
    batch: &NormalizedBatch,
    measurement: &str,
    tag_columns: &[String],
) -> Result<Vec<String>> {
    Ok(SeriesLayout::new(measurement, tag_columns)?.render(batch))
}

fn escape_measurement(name: &str) -> String {
    escape(name, &[',', ' '])
}

/// Tag keys, tag values and field keys share one escaping rule.
fn escape_key(name: &str) -> String {
    escape(name, &[',', '=', ' '])
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    for ch in raw.chars() {
        if special.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
