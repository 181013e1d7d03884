//! End-to-end plan scenarios over a realistic orders table.

use chrono::{TimeZone, Utc};
use serde_json::json;
use tally_plan::{
    execute, validate, BreakdownEntry, ColumnDtype, ColumnSchema, DatasetSchema, DatasetSource,
    ExecutionOptions, KpiPlan, MetricValue, Table, ValidationError,
};

fn orders_schema() -> DatasetSchema {
    DatasetSchema::new(vec![
        ColumnSchema::new("order_id", ColumnDtype::Integer).id_like(),
        ColumnSchema::new("region", ColumnDtype::Text),
        ColumnSchema::new("status", ColumnDtype::Text),
        ColumnSchema::new("revenue", ColumnDtype::Float),
        ColumnSchema::new("order_date", ColumnDtype::Date),
    ])
}

/// 100 orders. 40 paid inside the last 30 days (RegionA 20 x 450, RegionB
/// 10 x 400, RegionC 10 x 223.14), 30 pending inside the window and 30 paid
/// orders from April that fall outside it.
fn orders() -> Table {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut push = |region: &str, status: &str, revenue: &str, day: &str| {
        let id = rows.len() + 1;
        rows.push(vec![
            id.to_string(),
            region.to_string(),
            status.to_string(),
            revenue.to_string(),
            day.to_string(),
        ]);
    };

    for i in 0..20 {
        push("RegionA", "paid", "450", &format!("2024-06-{:02}", 1 + i));
    }
    for i in 0..10 {
        push("RegionB", "paid", "400", &format!("2024-06-{:02}", 10 + i));
    }
    for i in 0..10 {
        push("RegionC", "paid", "223.14", &format!("2024-06-{:02}", 20 + i));
    }
    for i in 0..30 {
        push("RegionA", "pending", "100", &format!("2024-06-{:02}", 1 + i));
    }
    for i in 0..30 {
        push("RegionB", "paid", "500", &format!("2024-04-{:02}", 1 + i));
    }

    Table::from_text_rows(orders_schema(), rows)
}

fn options() -> ExecutionOptions {
    ExecutionOptions::new(Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap())
}

fn paid_revenue_last_30_days() -> KpiPlan {
    KpiPlan::sum("revenue")
        .with_filter("status", "eq", json!("paid"))
        .with_window("order_date", 30)
}

#[test]
fn test_sum_with_filter_and_window() {
    let data = orders();
    assert_eq!(data.rows().len(), 100);

    let plan = validate(&paid_revenue_last_30_days(), data.schema()).unwrap();
    let result = execute(&plan, &data, &options());

    assert_eq!(result.value, MetricValue::Number(15231.40));
    assert!(result.value_breakdown.is_none());
    assert!(result.value_label.is_none());
}

#[test]
fn test_grouped_breakdown_percentages() {
    let data = orders();
    let plan = paid_revenue_last_30_days().with_group_by("region");
    let plan = validate(&plan, data.schema()).unwrap();
    let result = execute(&plan, &data, &options());

    assert_eq!(result.value, MetricValue::Number(15231.40));
    assert_eq!(result.value_label.as_deref(), Some("RegionA"));
    assert_eq!(
        result.value_breakdown.unwrap(),
        vec![
            BreakdownEntry {
                label: "RegionA".to_string(),
                value: MetricValue::Number(9000.0),
                pct: Some(59.08),
            },
            BreakdownEntry {
                label: "RegionB".to_string(),
                value: MetricValue::Number(4000.0),
                pct: Some(26.26),
            },
            BreakdownEntry {
                label: "RegionC".to_string(),
                value: MetricValue::Number(2231.40),
                pct: Some(14.66),
            },
        ]
    );
}

#[test]
fn test_result_serializes_for_storage() {
    let data = orders();
    let plan = paid_revenue_last_30_days().with_group_by("region");
    let plan = validate(&plan, data.schema()).unwrap();
    let result = execute(&plan, &data, &options());

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["value"], json!(15231.4));
    assert_eq!(json["value_breakdown"][2]["pct"], json!(14.66));
}

#[test]
fn test_avg_over_empty_filter_is_no_data() {
    let data = orders();
    let plan = validate(
        &KpiPlan::avg("revenue").with_filter("status", "eq", json!("refunded")),
        data.schema(),
    )
    .unwrap();
    let result = execute(&plan, &data, &options());
    assert_eq!(result.value, MetricValue::NoData);
    assert_eq!(serde_json::to_value(result.value).unwrap(), json!("no_data"));
}

#[test]
fn test_plan_from_model_json_is_validated_first() {
    let data = orders();
    let proposed: KpiPlan = serde_json::from_value(json!({
        "metric": "sum",
        "column": "revnue",
        "filters": []
    }))
    .unwrap();

    let err = validate(&proposed, data.schema()).unwrap_err();
    assert!(matches!(err, ValidationError::UnknownColumn { column, .. } if column == "revnue"));
}

#[test]
fn test_breakdown_cap_folds_other() {
    let schema = DatasetSchema::new(vec![
        ColumnSchema::new("sku", ColumnDtype::Text),
        ColumnSchema::new("units", ColumnDtype::Integer),
    ]);
    let rows: Vec<Vec<String>> = (1..=15)
        .map(|i| vec![format!("sku-{i:02}"), i.to_string()])
        .collect();
    let data = Table::from_text_rows(schema, rows);

    let plan = validate(&KpiPlan::sum("units").with_group_by("sku"), data.schema()).unwrap();
    let result = execute(&plan, &data, &options().with_max_breakdown_entries(5));
    let breakdown = result.value_breakdown.unwrap();

    assert_eq!(breakdown.len(), 5);
    assert_eq!(breakdown[0].label, "sku-15");
    assert_eq!(breakdown[4].label, "Other");
    // sku-01 .. sku-11 folded.
    assert_eq!(breakdown[4].value, MetricValue::Number(66.0));
    assert_eq!(result.value, MetricValue::Number(120.0));
}

#[test]
fn test_other_stays_last_even_when_largest() {
    let schema = DatasetSchema::new(vec![
        ColumnSchema::new("sku", ColumnDtype::Text),
        ColumnSchema::new("units", ColumnDtype::Integer),
    ]);
    let rows: Vec<Vec<String>> = (1..=15)
        .map(|i| vec![format!("sku-{i:02}"), i.to_string()])
        .collect();
    let data = Table::from_text_rows(schema, rows);

    let plan = validate(&KpiPlan::sum("units").with_group_by("sku"), data.schema()).unwrap();
    let result = execute(&plan, &data, &options().with_max_breakdown_entries(3));
    let breakdown = result.value_breakdown.unwrap();

    let labels: Vec<&str> = breakdown.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["sku-15", "sku-14", "Other"]);
    // sku-01 .. sku-13 fold into 91, more than any kept group.
    assert_eq!(breakdown[2].value, MetricValue::Number(91.0));
    assert!(breakdown[2].pct > breakdown[0].pct);
    // The largest named group still wins the headline label.
    assert_eq!(result.value_label.as_deref(), Some("sku-15"));
}

fn grouped_counts(columns: &[&str], rows: Vec<Vec<&str>>) -> Vec<BreakdownEntry> {
    let schema = DatasetSchema::new(
        columns
            .iter()
            .map(|name| ColumnSchema::new(*name, ColumnDtype::Text))
            .collect(),
    );
    let data = Table::from_text_rows(schema, rows);
    let mut plan = KpiPlan::count();
    for column in columns {
        plan = plan.with_group_by(*column);
    }
    let plan = validate(&plan, data.schema()).unwrap();
    execute(&plan, &data, &options()).value_breakdown.unwrap()
}

#[test]
fn test_literal_unknown_is_not_the_missing_group() {
    let breakdown = grouped_counts(&["region"], vec![vec!["Unknown"], vec![""]]);

    assert_eq!(breakdown.len(), 2);
    assert_eq!(breakdown[0].label, "Unknown");
    assert_eq!(breakdown[1].label, "Unknown (2)");
    assert!(breakdown
        .iter()
        .all(|e| e.value == MetricValue::Number(1.0)));
}

#[test]
fn test_separator_inside_values_keeps_tuples_apart() {
    let breakdown = grouped_counts(
        &["a", "b"],
        vec![vec!["x / y", "z"], vec!["x", "y / z"]],
    );

    assert_eq!(breakdown.len(), 2);
    let labels: Vec<&str> = breakdown.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["x / y / z", "x / y / z (2)"]);
    assert_eq!(breakdown[0].pct, Some(50.0));
    assert_eq!(breakdown[1].pct, Some(50.0));
}
