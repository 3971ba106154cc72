use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Cohort, ProgressAggregate, UserRecord};
use crate::progress::{self, ActivityWindow};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    #[default]
    Name,
    Progress,
    LastActive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RosterQuery {
    pub search: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProgressView {
    pub student: UserRecord,
    pub aggregate: ProgressAggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterRow {
    pub student_id: Uuid,
    pub name: String,
    pub email: String,
    pub enrolled_courses: usize,
    pub completed_courses: usize,
    pub overall_percentage: u8,
    pub total_minutes: u64,
    pub last_active: Option<DateTime<Utc>>,
}

/// One student's progress over the enrollments in `cohort`.
///
/// Used for the student self-view and the admin detail view; the caller
/// decides the scope of `cohort`.
pub fn student_view(
    student: UserRecord,
    cohort: &Cohort,
    today: NaiveDate,
    window: ActivityWindow,
) -> StudentProgressView {
    let aggregate = progress::aggregate_student(cohort, student.id, today, window);
    StudentProgressView { student, aggregate }
}

/// Roster rows for every student in `cohort`, filtered and sorted.
pub fn roster(cohort: &Cohort, today: NaiveDate, query: &RosterQuery) -> Vec<RosterRow> {
    let rows = cohort
        .students
        .iter()
        .map(|student| {
            let aggregate =
                progress::aggregate_student(cohort, student.id, today, ActivityWindow::Week);
            RosterRow {
                student_id: student.id,
                name: student.full_name.clone(),
                email: student.email.clone(),
                enrolled_courses: aggregate.enrolled_courses,
                completed_courses: aggregate.completed_courses,
                overall_percentage: aggregate.overall_percentage,
                total_minutes: aggregate.total_minutes,
                last_active: aggregate.last_active,
            }
        })
        .collect();

    let mut rows = filter_by_name(rows, query.search.as_deref().unwrap_or_default());
    sort_rows(&mut rows, query.sort, query.direction);
    rows
}

pub fn filter_by_name(rows: Vec<RosterRow>, search: &str) -> Vec<RosterRow> {
    let needle = search.trim().to_lowercase();
    if needle.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| row.name.to_lowercase().contains(&needle))
        .collect()
}

/// Stable sort; rows with equal keys keep their incoming order.
pub fn sort_rows(rows: &mut [RosterRow], key: SortKey, direction: SortDirection) {
    rows.sort_by(|a, b| {
        let ordering = compare(a, b, key);
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

fn compare(a: &RosterRow, b: &RosterRow, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortKey::Progress => a.overall_percentage.cmp(&b.overall_percentage),
        SortKey::LastActive => a.last_active.cmp(&b.last_active),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Enrollment, LessonCompletion, Role};
    use chrono::{Duration, TimeZone};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn row(name: &str, progress: u8, last_active_days_ago: Option<i64>) -> RosterRow {
        RosterRow {
            student_id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            enrolled_courses: 1,
            completed_courses: 0,
            overall_percentage: progress,
            total_minutes: 0,
            last_active: last_active_days_ago
                .map(|days| Utc::now() - Duration::days(days)),
        }
    }

    fn names(rows: &[RosterRow]) -> Vec<&str> {
        rows.iter().map(|r| r.name.as_str()).collect()
    }

    fn progress_values(rows: &[RosterRow]) -> Vec<u8> {
        rows.iter().map(|r| r.overall_percentage).collect()
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let rows = vec![row("Jennifer Lee", 40, None), row("Robert Garcia", 60, None)];
        let filtered = filter_by_name(rows, "lee");
        assert_eq!(names(&filtered), vec!["Jennifer Lee"]);
    }

    #[test]
    fn blank_search_keeps_everything() {
        let rows = vec![row("Jennifer Lee", 40, None), row("Robert Garcia", 60, None)];
        assert_eq!(filter_by_name(rows, "   ").len(), 2);
    }

    #[test]
    fn progress_sort_directions_are_reversed() {
        let mut rows = vec![row("A", 20, None), row("B", 80, None), row("C", 50, None)];

        sort_rows(&mut rows, SortKey::Progress, SortDirection::Asc);
        assert_eq!(progress_values(&rows), vec![20, 50, 80]);
        let ascending = names(&rows).join(",");

        sort_rows(&mut rows, SortKey::Progress, SortDirection::Desc);
        assert_eq!(progress_values(&rows), vec![80, 50, 20]);
        let mut descending: Vec<&str> = names(&rows);
        descending.reverse();
        assert_eq!(descending.join(","), ascending);
    }

    #[test]
    fn ties_keep_input_order() {
        let mut rows = vec![
            row("First", 50, None),
            row("Second", 10, None),
            row("Third", 50, None),
        ];
        sort_rows(&mut rows, SortKey::Progress, SortDirection::Asc);
        assert_eq!(names(&rows), vec!["Second", "First", "Third"]);
    }

    #[test]
    fn name_sort_ignores_case() {
        let mut rows = vec![
            row("robert Garcia", 0, None),
            row("Aisha Khan", 0, None),
            row("jennifer Lee", 0, None),
        ];
        sort_rows(&mut rows, SortKey::Name, SortDirection::Asc);
        assert_eq!(names(&rows), vec!["Aisha Khan", "jennifer Lee", "robert Garcia"]);
    }

    #[test]
    fn last_active_sort_puts_never_active_first() {
        let mut rows = vec![
            row("Recent", 0, Some(1)),
            row("Never", 0, None),
            row("Stale", 0, Some(20)),
        ];
        sort_rows(&mut rows, SortKey::LastActive, SortDirection::Asc);
        assert_eq!(names(&rows), vec!["Never", "Stale", "Recent"]);
        sort_rows(&mut rows, SortKey::LastActive, SortDirection::Desc);
        assert_eq!(names(&rows), vec!["Recent", "Stale", "Never"]);
    }

    #[test]
    fn roster_builds_rows_per_student() {
        let course_id = Uuid::new_v4();
        let jennifer = UserRecord {
            id: Uuid::new_v4(),
            full_name: "Jennifer Lee".to_string(),
            email: "jennifer.lee@example.com".to_string(),
            role: Role::Student,
        };
        let robert = UserRecord {
            id: Uuid::new_v4(),
            full_name: "Robert Garcia".to_string(),
            email: "robert.garcia@example.com".to_string(),
            role: Role::Student,
        };
        let enrolled_at = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let enrollment = |student_id| Enrollment {
            student_id,
            course_id,
            course_title: "Rust Fundamentals".to_string(),
            total_lessons: 4,
            enrolled_at,
            last_accessed: None,
        };
        let completed_at = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        let cohort = Cohort {
            students: vec![jennifer.clone(), robert.clone()],
            enrollments: vec![enrollment(jennifer.id), enrollment(robert.id)],
            completions: (0..3)
                .map(|_| LessonCompletion {
                    student_id: robert.id,
                    course_id,
                    lesson_id: Uuid::new_v4(),
                    completed_at,
                    time_spent_minutes: 20,
                })
                .collect(),
        };

        let query = RosterQuery {
            search: None,
            sort: SortKey::Progress,
            direction: SortDirection::Desc,
        };
        let rows = roster(&cohort, today(), &query);
        assert_eq!(names(&rows), vec!["Robert Garcia", "Jennifer Lee"]);
        assert_eq!(rows[0].overall_percentage, 75);
        assert_eq!(rows[0].total_minutes, 60);
        assert_eq!(rows[0].last_active, Some(completed_at));
        assert_eq!(rows[1].overall_percentage, 0);
        assert_eq!(rows[1].last_active, None);

        let view = student_view(jennifer, &cohort, today(), ActivityWindow::Month);
        assert_eq!(view.aggregate.enrolled_courses, 1);
        assert_eq!(view.aggregate.activity.len(), 30);
    }

    #[test]
    fn query_parses_kebab_case_sort() {
        let query: RosterQuery =
            serde_json::from_str(r#"{"search":"lee","sort":"last-active","direction":"desc"}"#)
                .unwrap();
        assert_eq!(query.sort, SortKey::LastActive);
        assert_eq!(query.direction, SortDirection::Desc);

        let defaults: RosterQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults.sort, SortKey::Name);
        assert_eq!(defaults.direction, SortDirection::Asc);
    }
}
