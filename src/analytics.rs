//! Dashboard aggregates over task rows. Pure functions; nothing here touches storage.

use crate::models::{
    DashboardSummary, MemberPerformance, MonthlyDeliveryStats, MonthlyStatusCount, Record, StatusCounts, TaskStatus,
    STATUS_COLUMN,
};
use crate::otd::parse_calendar_date;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;

pub const ASSIGNEE_COLUMN: &str = "name_activity_pilot";
pub const ACTUAL_DELIVERY_COLUMN: &str = "actual_delivery_date";
pub const START_DATE_COLUMN: &str = "start_date";
pub const OTD_COLUMN: &str = "otd_internal";
pub const FTR_COLUMN: &str = "ftr_internal";

const UNASSIGNED: &str = "Unassigned";

fn text<'a>(record: &'a Record, column: &str) -> Option<&'a str> {
    record
        .get(column)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn status_of(record: &Record) -> Option<TaskStatus> {
    text(record, STATUS_COLUMN).and_then(TaskStatus::parse)
}

fn month_of(record: &Record, column: &str) -> Option<String> {
    text(record, column)
        .and_then(parse_calendar_date)
        .map(|date| date.format("%Y-%m").to_string())
}

fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    (part * 100 / whole) as u32
}

pub fn status_counts(records: &[Record]) -> StatusCounts {
    let mut counts = StatusCounts {
        total: records.len(),
        ..StatusCounts::default()
    };
    for record in records {
        match status_of(record) {
            Some(TaskStatus::Hold) => counts.hold += 1,
            Some(TaskStatus::InProgress) => counts.in_progress += 1,
            Some(TaskStatus::Completed) => counts.completed += 1,
            Some(TaskStatus::Cancelled) => counts.cancelled += 1,
            None => counts.unknown += 1,
        }
    }
    counts
}

/// Whole-number share of completed rows; 0 for an empty set.
pub fn completion_percent(counts: &StatusCounts) -> u32 {
    percent(counts.completed, counts.total)
}

/// Per-assignee task count and completion share, in first-seen order.
pub fn member_performance(records: &[Record], assignee_column: &str) -> Vec<MemberPerformance> {
    let mut members: Vec<MemberPerformance> = Vec::new();
    for record in records {
        let name = text(record, assignee_column).unwrap_or(UNASSIGNED);
        let index = match members.iter().position(|member| member.name == name) {
            Some(index) => index,
            None => {
                members.push(MemberPerformance {
                    name: name.to_string(),
                    task_count: 0,
                    completed: 0,
                    percent: 0,
                });
                members.len() - 1
            }
        };
        let member = &mut members[index];
        member.task_count += 1;
        if status_of(record) == Some(TaskStatus::Completed) {
            member.completed += 1;
        }
    }
    for member in &mut members {
        member.percent = percent(member.completed, member.task_count);
    }
    members
}

/// OTD and FTR shares per delivery month. Rows without a parseable actual
/// delivery date are left out. OTD counts `OK` and the legacy `Yes`.
pub fn monthly_delivery_stats(records: &[Record]) -> Vec<MonthlyDeliveryStats> {
    let mut months: BTreeMap<String, (usize, usize, usize)> = BTreeMap::new();
    for record in records {
        let Some(month) = month_of(record, ACTUAL_DELIVERY_COLUMN) else {
            continue;
        };
        let entry = months.entry(month).or_default();
        entry.0 += 1;
        if matches!(text(record, OTD_COLUMN), Some("OK") | Some("Yes")) {
            entry.1 += 1;
        }
        if text(record, FTR_COLUMN) == Some("Yes") {
            entry.2 += 1;
        }
    }

    months
        .into_iter()
        .map(|(month, (delivered, on_time, first_time_right))| MonthlyDeliveryStats {
            month,
            delivered,
            otd_percent: on_time as f64 * 100.0 / delivered as f64,
            ftr_percent: first_time_right as f64 * 100.0 / delivered as f64,
        })
        .collect()
}

/// Row counts per start month and status. Unrecognized statuses are kept under
/// their raw text.
pub fn monthly_status_counts(records: &[Record]) -> Vec<MonthlyStatusCount> {
    let mut buckets: BTreeMap<(String, String), usize> = BTreeMap::new();
    for record in records {
        let Some(month) = month_of(record, START_DATE_COLUMN) else {
            continue;
        };
        let status = match status_of(record) {
            Some(status) => status.as_str().to_string(),
            None => text(record, STATUS_COLUMN).unwrap_or("Unknown").to_string(),
        };
        *buckets.entry((month, status)).or_default() += 1;
    }

    buckets
        .into_iter()
        .map(|((month, status), count)| MonthlyStatusCount { month, status, count })
        .collect()
}

/// Rows whose `column` parses to a date within `from..=to`.
pub fn filter_by_date_range(records: &[Record], column: &str, from: NaiveDate, to: NaiveDate) -> Vec<Record> {
    records
        .iter()
        .filter(|record| {
            text(record, column)
                .and_then(parse_calendar_date)
                .is_some_and(|date| date >= from && date <= to)
        })
        .cloned()
        .collect()
}

pub fn records_assigned_to(records: &[Record], assignee_column: &str, name: &str) -> Vec<Record> {
    let name = name.trim();
    records
        .iter()
        .filter(|record| text(record, assignee_column) == Some(name))
        .cloned()
        .collect()
}

pub fn dashboard_summary(records: &[Record]) -> DashboardSummary {
    let counts = status_counts(records);
    DashboardSummary {
        completion_percent: completion_percent(&counts),
        counts,
        members: member_performance(records, ASSIGNEE_COLUMN),
        monthly_delivery: monthly_delivery_stats(records),
        monthly_status: monthly_status_counts(records),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Record> {
        json!([
            { "name_activity_pilot": "Sara", "status": "Completed", "start_date": "2024-04-02",
              "actual_delivery_date": "2024-05-08", "otd_internal": "OK", "ftr_internal": "Yes" },
            { "name_activity_pilot": "Sara", "status": "Inprogress", "start_date": "2024-04-20",
              "actual_delivery_date": null, "otd_internal": "NOT_APPLICABLE" },
            { "name_activity_pilot": "Omar", "status": "Completed", "start_date": "03/05/2024",
              "actual_delivery_date": "2024-05-20", "otd_internal": "NOT_OK", "ftr_internal": "NO" },
            { "name_activity_pilot": "", "status": "Hold", "start_date": "2024-05-11",
              "actual_delivery_date": "15/06/2024", "otd_internal": "Yes", "ftr_internal": "Yes" },
            { "status": "archived" }
        ])
        .as_array()
        .expect("array")
        .iter()
        .map(|row| row.as_object().cloned().expect("object"))
        .collect()
    }

    #[test]
    fn counts_statuses_and_completion() {
        let counts = status_counts(&rows());
        assert_eq!(counts.total, 5);
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.in_progress, 1);
        assert_eq!(counts.hold, 1);
        assert_eq!(counts.unknown, 1);
        assert_eq!(completion_percent(&counts), 40);
        assert_eq!(completion_percent(&StatusCounts::default()), 0);
    }

    #[test]
    fn member_performance_groups_blank_as_unassigned() {
        let members = member_performance(&rows(), ASSIGNEE_COLUMN);
        let names: Vec<_> = members.iter().map(|member| member.name.as_str()).collect();
        assert_eq!(names, vec!["Sara", "Omar", "Unassigned"]);
        assert_eq!(members[0].task_count, 2);
        assert_eq!(members[0].percent, 50);
        assert_eq!(members[1].percent, 100);
        assert_eq!(members[2].task_count, 2);
    }

    #[test]
    fn delivery_stats_are_keyed_by_year_and_month() {
        let stats = monthly_delivery_stats(&rows());
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].month, "2024-05");
        assert_eq!(stats[0].delivered, 2);
        assert_eq!(stats[0].otd_percent, 50.0);
        assert_eq!(stats[0].ftr_percent, 50.0);
        assert_eq!(stats[1].month, "2024-06");
        assert_eq!(stats[1].otd_percent, 100.0);
    }

    #[test]
    fn status_counts_by_start_month() {
        let buckets = monthly_status_counts(&rows());
        assert_eq!(
            buckets,
            vec![
                MonthlyStatusCount { month: "2024-04".into(), status: "Completed".into(), count: 1 },
                MonthlyStatusCount { month: "2024-04".into(), status: "Inprogress".into(), count: 1 },
                MonthlyStatusCount { month: "2024-05".into(), status: "Completed".into(), count: 1 },
                MonthlyStatusCount { month: "2024-05".into(), status: "Hold".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn date_range_and_assignee_filters() {
        let from = NaiveDate::from_ymd_opt(2024, 4, 15).expect("date");
        let to = NaiveDate::from_ymd_opt(2024, 5, 3).expect("date");
        let in_range = filter_by_date_range(&rows(), START_DATE_COLUMN, from, to);
        assert_eq!(in_range.len(), 2);

        let saras = records_assigned_to(&rows(), ASSIGNEE_COLUMN, " Sara ");
        assert_eq!(saras.len(), 2);
    }

    #[test]
    fn summary_composes_every_aggregate() {
        let summary = dashboard_summary(&rows());
        assert_eq!(summary.counts.total, 5);
        assert_eq!(summary.completion_percent, 40);
        assert_eq!(summary.members.len(), 3);
        assert_eq!(summary.monthly_delivery.len(), 2);
        assert_eq!(summary.monthly_status.len(), 4);
    }
}
