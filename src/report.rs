use std::fmt::Write;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::progress::format_minutes;
use crate::views::{sort_rows, RosterRow, SortDirection, SortKey};

const INACTIVE_AFTER_DAYS: i64 = 14;

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    student_id: Uuid,
    name: &'a str,
    email: &'a str,
    enrolled_courses: usize,
    completed_courses: usize,
    overall_percentage: u8,
    total_minutes: u64,
    last_active: String,
}

pub fn write_csv<W: std::io::Write>(rows: &[RosterRow], writer: W) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(CsvRow {
            student_id: row.student_id,
            name: &row.name,
            email: &row.email,
            enrolled_courses: row.enrolled_courses,
            completed_courses: row.completed_courses,
            overall_percentage: row.overall_percentage,
            total_minutes: row.total_minutes,
            last_active: row.last_active.map(|t| t.to_rfc3339()).unwrap_or_default(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn export_csv(rows: &[RosterRow]) -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    write_csv(rows, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn is_inactive(last_active: Option<DateTime<Utc>>, today: NaiveDate) -> bool {
    match last_active {
        Some(at) => (today - at.date_naive()).num_days() >= INACTIVE_AFTER_DAYS,
        None => true,
    }
}

pub fn build_report(scope: Option<&str>, today: NaiveDate, rows: &[RosterRow]) -> String {
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all courses");

    let _ = writeln!(output, "# Student Progress Report");
    let _ = writeln!(output, "Generated for {} on {}", scope_label, today);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");

    if rows.is_empty() {
        let _ = writeln!(output, "No students enrolled yet.");
        return output;
    }

    let total_minutes: u64 = rows.iter().map(|r| r.total_minutes).sum();
    let mean_progress =
        rows.iter().map(|r| f64::from(r.overall_percentage)).sum::<f64>() / rows.len() as f64;
    let completions: usize = rows.iter().map(|r| r.completed_courses).sum();

    let _ = writeln!(output, "- Students: {}", rows.len());
    let _ = writeln!(output, "- Average progress: {:.0}%", mean_progress);
    let _ = writeln!(output, "- Courses completed: {}", completions);
    let _ = writeln!(output, "- Time learned: {}", format_minutes(total_minutes));

    let mut by_progress = rows.to_vec();
    sort_rows(&mut by_progress, SortKey::Progress, SortDirection::Desc);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Students by Progress");
    let _ = writeln!(output, "| Student | Courses | Completed | Progress | Time | Last active |");
    let _ = writeln!(output, "| --- | --- | --- | --- | --- | --- |");
    for row in by_progress.iter() {
        let _ = writeln!(
            output,
            "| {} ({}) | {} | {} | {}% | {} | {} |",
            row.name,
            row.email,
            row.enrolled_courses,
            row.completed_courses,
            row.overall_percentage,
            format_minutes(row.total_minutes),
            row.last_active
                .map(|t| t.date_naive().to_string())
                .unwrap_or_else(|| "never".to_string())
        );
    }

    let mut inactive: Vec<RosterRow> = rows
        .iter()
        .filter(|r| is_inactive(r.last_active, today))
        .cloned()
        .collect();
    sort_rows(&mut inactive, SortKey::LastActive, SortDirection::Asc);
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "## Inactive for {}+ Days",
        INACTIVE_AFTER_DAYS
    );

    if inactive.is_empty() {
        let _ = writeln!(output, "Everyone has been active recently.");
    } else {
        for row in inactive.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}) at {}%",
                row.name, row.email, row.overall_percentage
            );
        }
    }

    output
}
