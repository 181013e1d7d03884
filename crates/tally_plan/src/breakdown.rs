//! Breakdown ordering, capping and percentage shares.

use crate::value::{round2, BreakdownEntry, MetricValue, OTHER_LABEL};
use std::cmp::Ordering;

/// Order groups, fold the tail into `Other` when over `cap`, and assign shares.
///
/// Defined values sort descending, no-data groups last, ties by label.
/// `Other` is always the final entry, even when its folded value is larger
/// than the groups kept above it. Values and shares come out rounded to two
/// decimals. The shares of the defined entries sum to exactly 100.00 whenever
/// every value is non-negative and the total is positive.
pub fn build_breakdown(groups: Vec<(String, MetricValue)>, cap: usize) -> Vec<BreakdownEntry> {
    let mut groups = groups;
    groups.sort_by(|(la, va), (lb, vb)| compare_values(va, vb).then_with(|| la.cmp(lb)));

    let cap = cap.max(1);
    if groups.len() > cap {
        let tail = groups.split_off(cap - 1);
        let folded: f64 = tail.iter().filter_map(|(_, v)| v.as_f64()).sum();
        let other = if tail.iter().any(|(_, v)| !v.is_no_data()) {
            MetricValue::Number(folded)
        } else {
            MetricValue::NoData
        };
        groups.push((OTHER_LABEL.to_string(), other));
    }

    let shares = shares(&groups);
    groups
        .into_iter()
        .zip(shares)
        .map(|((label, value), pct)| BreakdownEntry {
            label,
            value: value.rounded(),
            pct,
        })
        .collect()
}

fn compare_values(a: &MetricValue, b: &MetricValue) -> Ordering {
    match (a, b) {
        (MetricValue::Number(x), MetricValue::Number(y)) => {
            y.partial_cmp(x).unwrap_or(Ordering::Equal)
        }
        (MetricValue::Number(_), MetricValue::NoData) => Ordering::Less,
        (MetricValue::NoData, MetricValue::Number(_)) => Ordering::Greater,
        (MetricValue::NoData, MetricValue::NoData) => Ordering::Equal,
    }
}

/// Percentage shares in hundredths of a percent.
///
/// Each defined entry gets the floor of its share; the last defined entry takes
/// the remainder so the column always adds up to 100.00.
fn shares(groups: &[(String, MetricValue)]) -> Vec<Option<f64>> {
    let values: Vec<Option<f64>> = groups.iter().map(|(_, v)| v.as_f64()).collect();
    let total: f64 = values.iter().flatten().sum();

    if total == 0.0 || !total.is_finite() {
        return values.iter().map(|v| v.map(|_| 0.0)).collect();
    }

    if total < 0.0 || values.iter().flatten().any(|v| *v < 0.0) {
        return values
            .iter()
            .map(|v| v.map(|v| round2(v / total * 100.0)))
            .collect();
    }

    let last_defined = values.iter().rposition(|v| v.is_some());
    let mut allocated: i64 = 0;
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.map(|v| {
                let hundredths = if Some(i) == last_defined {
                    10_000 - allocated
                } else {
                    (v / total * 10_000.0 + 1e-9).floor() as i64
                };
                allocated += hundredths;
                hundredths as f64 / 100.0
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(label: &str, v: f64) -> (String, MetricValue) {
        (label.to_string(), MetricValue::Number(v))
    }

    #[test]
    fn test_orders_descending_with_no_data_last() {
        let entries = build_breakdown(
            vec![
                ("Z".to_string(), MetricValue::NoData),
                n("B", 10.0),
                n("A", 10.0),
                n("C", 30.0),
            ],
            10,
        );
        let labels: Vec<_> = entries.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["C", "A", "B", "Z"]);
        assert_eq!(entries[3].pct, None);
    }

    #[test]
    fn test_shares_sum_to_hundred() {
        let entries = build_breakdown(vec![n("A", 9000.0), n("B", 4000.0), n("C", 2231.4)], 10);
        let pcts: Vec<_> = entries.iter().map(|e| e.pct.unwrap()).collect();
        assert_eq!(pcts, vec![59.08, 26.26, 14.66]);

        let thirds = build_breakdown(vec![n("A", 1.0), n("B", 1.0), n("C", 1.0)], 10);
        let sum: f64 = thirds.iter().map(|e| e.pct.unwrap()).sum();
        assert!((sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_cap_folds_tail_into_other() {
        let groups: Vec<_> = (1..=12).map(|i| n(&format!("g{i:02}"), i as f64)).collect();
        let entries = build_breakdown(groups, 10);

        assert_eq!(entries.len(), 10);
        let other = entries.last().unwrap();
        assert_eq!(other.label, OTHER_LABEL);
        // g12..g04 kept, g03 + g02 + g01 folded.
        assert_eq!(other.value, MetricValue::Number(6.0));
        assert_eq!(entries[0].label, "g12");
    }

    #[test]
    fn test_zero_total_gives_zero_shares() {
        let entries = build_breakdown(vec![n("A", 0.0), n("B", 0.0)], 10);
        assert!(entries.iter().all(|e| e.pct == Some(0.0)));
    }
}
