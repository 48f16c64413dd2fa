//! Tabular and JSON exports of an aggregate document.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{
    aggregate::{AggregateDocument, DimensionTable, KeyedStat},
    artifacts::{aggregate_path, write_json},
    error::BenchError,
};

/// Category metrics exported to `categories.csv`, with their units.
const CATEGORY_COLUMNS: [(&str, &str, &str); 5] = [
    ("successRate", "SuccessRate", "%"),
    ("avgLatencyMs", "Latency", "ms"),
    ("p95LatencyMs", "P95Latency", "ms"),
    ("p99LatencyMs", "P99Latency", "ms"),
    ("avgResourceCost", "ResourceCost", "gas"),
];

/// Renders a dimension table as CSV.
///
/// Header: `<KeyLabel>,Avg<Label>(<unit>),Min<Label>(<unit>),Max<Label>(<unit>),...,Samples`.
/// A key a field was never sampled for gets three empty cells.
/// `Samples` counts the rounds that reported the key, so a field missing from
/// some of those rounds is averaged over fewer values. The per-field count is
/// kept in `aggregate.json` as `samples`.
pub fn dimension_csv(table: &DimensionTable) -> String {
    let mut header = vec![table.spec.key_label()];
    for field in &table.spec.fields {
        let label = field.label();
        let unit = field.unit.as_deref().map(|u| format!("({u})")).unwrap_or_default();
        for stat in ["Avg", "Min", "Max"] {
            header.push(format!("{stat}{label}{unit}"));
        }
    }
    header.push("Samples".to_string());

    let mut out = String::new();
    push_row(&mut out, &header);
    for row in &table.rows {
        let mut cells = vec![row.key.to_string()];
        for field in &table.spec.fields {
            cells.extend(stat_cells(row.fields.get(&field.field)));
        }
        cells.push(row.rounds.len().to_string());
        push_row(&mut out, &cells);
    }
    out
}

/// Renders per-category metrics as CSV, one row per category.
pub fn categories_csv(doc: &AggregateDocument) -> String {
    let mut header = vec!["Category".to_string()];
    for (_, label, unit) in CATEGORY_COLUMNS {
        for stat in ["Avg", "Min", "Max"] {
            header.push(format!("{stat}{label}({unit})"));
        }
    }
    header.push("Samples".to_string());

    let mut out = String::new();
    push_row(&mut out, &header);
    for (name, category) in &doc.categories {
        let mut cells = vec![name.clone()];
        for (metric, _, _) in CATEGORY_COLUMNS {
            cells.extend(stat_cells(category.metrics.get(metric)));
        }
        cells.push(category.rounds.len().to_string());
        push_row(&mut out, &cells);
    }
    out
}

fn stat_cells(stat: Option<&KeyedStat>) -> [String; 3] {
    match stat {
        Some(s) => [format_number(s.avg), format_number(s.min), format_number(s.max)],
        None => Default::default(),
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.4}").trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn push_row(out: &mut String, cells: &[String]) {
    let escaped: Vec<String> = cells.iter().map(|c| escape(c)).collect();
    let _ = writeln!(out, "{}", escaped.join(","));
}

fn escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Writes `aggregate.json`, `categories.csv` and one `<dimension>.csv` per table.
pub fn write_exports(output_dir: &Path, doc: &AggregateDocument) -> Result<Vec<PathBuf>, BenchError> {
    fs::create_dir_all(output_dir).map_err(|e| BenchError::io(output_dir, e))?;

    let json_path = aggregate_path(output_dir);
    write_json(&json_path, doc)?;
    let mut written = vec![json_path];

    let categories = output_dir.join("categories.csv");
    fs::write(&categories, categories_csv(doc)).map_err(|e| BenchError::io(&categories, e))?;
    written.push(categories);

    for table in &doc.dimensions {
        let path = output_dir.join(format!("{}.csv", table.spec.name));
        fs::write(&path, dimension_csv(table)).map_err(|e| BenchError::io(&path, e))?;
        written.push(path);
    }

    info!(dir = %output_dir.display(), files = written.len(), "Wrote aggregate exports");
    Ok(written)
}
