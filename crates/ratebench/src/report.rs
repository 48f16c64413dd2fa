//! Fixed-width summary tables printed at the end of a run.

use std::fmt::Write as _;

use crate::{aggregate::AggregateDocument, round::RoundResult};

const RULE_WIDTH: usize = 92;

fn rule(out: &mut String) {
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
}

/// Per-category summary of one round.
pub fn round_table(round: &RoundResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Round {} ({})", round.round, round.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    rule(&mut out);
    let _ = writeln!(
        out,
        "{:<16} {:>6} {:>6} {:>6} {:>9} {:>10} {:>10} {:>10} {:>12}",
        "Category", "Tests", "Pass", "Fail", "Success%", "Avg ms", "P95 ms", "Max ms", "Total gas"
    );
    rule(&mut out);
    for (name, category) in &round.categories {
        match &category.metrics {
            Some(m) => {
                let _ = writeln!(
                    out,
                    "{:<16} {:>6} {:>6} {:>6} {:>9.1} {:>10.2} {:>10.2} {:>10.2} {:>12.0}",
                    name,
                    m.total_tests,
                    m.successful_tests,
                    m.failed_tests,
                    m.success_rate,
                    m.latency.avg,
                    m.latency.p95,
                    m.latency.max,
                    m.total_resource_cost
                );
            }
            None => {
                let _ = writeln!(out, "{name:<16} {:>6}   (no outcomes)", 0);
            }
        }
    }
    rule(&mut out);
    let _ = writeln!(
        out,
        "Total: {} tests, {} passed, {} failed, {} skipped",
        round.total(),
        round.passed(),
        round.failed(),
        round.skipped.len()
    );
    out
}

/// Cross-round summary: averages with the spread between rounds.
pub fn aggregate_table(doc: &AggregateDocument) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Aggregate over {} round(s){}",
        doc.rounds_included.len(),
        if doc.gaps.is_empty() { String::new() } else { format!(", {} gap(s)", doc.gaps.len()) }
    );
    rule(&mut out);
    let _ = writeln!(
        out,
        "{:<16} {:>7} {:>10} {:>21} {:>10} {:>12}",
        "Category", "Rounds", "Success%", "Avg ms (min..max)", "P95 ms", "Avg gas"
    );
    rule(&mut out);
    for (name, category) in &doc.categories {
        let metric = |key: &str| category.metrics.get(key);
        let success = metric("successRate").map_or(0.0, |s| s.avg);
        let latency = metric("avgLatencyMs")
            .map(|s| format!("{:.2} ({:.2}..{:.2})", s.avg, s.min, s.max))
            .unwrap_or_default();
        let p95 = metric("p95LatencyMs").map_or(0.0, |s| s.avg);
        let gas = metric("avgResourceCost").map_or(0.0, |s| s.avg);
        let _ = writeln!(
            out,
            "{:<16} {:>7} {:>10.1} {:>21} {:>10.2} {:>12.0}",
            name,
            category.rounds.len(),
            success,
            latency,
            p95,
            gas
        );
    }
    rule(&mut out);
    for gap in &doc.gaps {
        let _ = writeln!(out, "gap: {} ({})", gap.source, gap.reason);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, time::Duration};

    use chrono::Utc;

    use super::*;
    use crate::{
        aggregate::{Aggregator, RoundSource},
        error::BenchError,
        outcome::{Outcome, Payload},
        round::CategoryReport,
    };

    fn sample_round() -> RoundResult {
        let outcomes = vec![
            Outcome::success("a", "roles", Duration::from_millis(10), Some(48_000.0), Payload::new()),
            Outcome::failure("b", "roles", Duration::from_millis(30), "reverted"),
        ];
        RoundResult {
            round: 4,
            timestamp: Utc::now(),
            categories: BTreeMap::from([
                ("roles".to_string(), CategoryReport::from_results("roles", outcomes)),
                ("empty".to_string(), CategoryReport::from_results("empty", Vec::new())),
            ]),
            skipped: Vec::new(),
        }
    }

    #[test]
    fn test_round_table() {
        let table = round_table(&sample_round());
        assert!(table.starts_with("Round 4 ("));
        let roles = table.lines().find(|l| l.starts_with("roles")).unwrap();
        let cells: Vec<&str> = roles.split_whitespace().collect();
        assert_eq!(cells, vec!["roles", "2", "1", "1", "50.0", "20.00", "30.00", "30.00", "48000"]);
        assert!(table.contains("(no outcomes)"));
        assert!(table.contains("Total: 2 tests, 1 passed, 1 failed, 0 skipped"));
    }

    #[test]
    fn test_aggregate_table_lists_gaps() {
        let doc = Aggregator::default()
            .aggregate([
                RoundSource::loaded("round-4", sample_round()),
                RoundSource { label: "round-5".into(), round: Err(BenchError::Setup("missing".into())) },
            ])
            .unwrap();

        let table = aggregate_table(&doc);
        assert!(table.starts_with("Aggregate over 1 round(s), 1 gap(s)"));
        assert!(table.contains("20.00 (20.00..20.00)"));
        assert!(table.contains("gap: round-5 (setup failed: missing)"));
    }
}
