use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{
    Achievement, AchievementStatus, Cohort, CourseProgress, DailyActivity, Enrollment,
    LessonCompletion, ProgressAggregate,
};

const STREAK_TARGET_DAYS: u32 = 5;
const FIFTY_HOURS_IN_MINUTES: u64 = 50 * 60;
const CERTIFICATE_COLLECTOR_COURSES: usize = 3;

/// Trailing window for the daily activity histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ActivityWindow {
    #[default]
    Week,
    Month,
}

impl ActivityWindow {
    pub fn days(self) -> i64 {
        match self {
            ActivityWindow::Week => 7,
            ActivityWindow::Month => 30,
        }
    }
}

/// Completion percentage for one course, 0 when the course has no lessons.
pub fn course_percentage(completed: u32, total: u32) -> u8 {
    (completion_ratio(completed, total) * 100.0).round() as u8
}

fn completion_ratio(completed: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (completed as f64 / total as f64).clamp(0.0, 1.0)
}

/// Derives one course's progress from the student's completion events.
///
/// Repeated completions of a lesson count once toward the lesson total but
/// every event's time is included in the time spent.
pub fn course_progress(enrollment: &Enrollment, completions: &[LessonCompletion]) -> CourseProgress {
    let mut lessons = HashSet::new();
    let mut time_spent_minutes = 0u64;
    let mut last_accessed = enrollment.last_accessed;

    for completion in completions.iter().filter(|c| {
        c.student_id == enrollment.student_id && c.course_id == enrollment.course_id
    }) {
        lessons.insert(completion.lesson_id);
        time_spent_minutes += u64::from(completion.time_spent_minutes);
        if last_accessed.map_or(true, |seen| completion.completed_at > seen) {
            last_accessed = Some(completion.completed_at);
        }
    }

    let completed_lessons = (lessons.len() as u32).min(enrollment.total_lessons);

    CourseProgress {
        course_id: enrollment.course_id,
        course_title: enrollment.course_title.clone(),
        completed_lessons,
        total_lessons: enrollment.total_lessons,
        percentage: course_percentage(completed_lessons, enrollment.total_lessons),
        time_spent_minutes,
        enrolled_at: enrollment.enrolled_at,
        last_accessed,
    }
}

/// Combines per-course records and raw events into the overall aggregate.
///
/// Overall percentage is the simple mean of per-course completion ratios.
pub fn aggregate(
    courses: &[CourseProgress],
    completions: &[LessonCompletion],
    today: NaiveDate,
    window: ActivityWindow,
) -> ProgressAggregate {
    let completed_courses = courses.iter().filter(|c| c.is_completed()).count();
    let completed_lessons = courses.iter().map(|c| c.completed_lessons).sum();
    let total_lessons = courses.iter().map(|c| c.total_lessons).sum();
    let total_minutes = courses.iter().map(|c| c.time_spent_minutes).sum();
    let last_active = courses.iter().filter_map(|c| c.last_accessed).max();

    let overall_percentage = if courses.is_empty() {
        0
    } else {
        let ratio_sum: f64 = courses
            .iter()
            .map(|c| completion_ratio(c.completed_lessons, c.total_lessons))
            .sum();
        (ratio_sum / courses.len() as f64 * 100.0).round() as u8
    };

    let active_days = active_days(completions, today);
    let current_streak = current_streak(&active_days, today);
    let longest_streak = longest_streak(&active_days);

    let mut aggregate = ProgressAggregate {
        enrolled_courses: courses.len(),
        completed_courses,
        completed_lessons,
        total_lessons,
        overall_percentage,
        total_minutes,
        current_streak,
        longest_streak,
        last_active,
        courses: courses.to_vec(),
        activity: activity_histogram(completions, today, window),
        achievements: Vec::new(),
    };
    aggregate.achievements = achievements(&aggregate);
    aggregate
}

/// Aggregate for one student over the enrollments present in `cohort`.
pub fn aggregate_student(
    cohort: &Cohort,
    student_id: Uuid,
    today: NaiveDate,
    window: ActivityWindow,
) -> ProgressAggregate {
    let completions: Vec<LessonCompletion> = cohort
        .completions
        .iter()
        .filter(|c| c.student_id == student_id)
        .cloned()
        .collect();
    let courses: Vec<CourseProgress> = cohort
        .enrollments
        .iter()
        .filter(|e| e.student_id == student_id)
        .map(|e| course_progress(e, &completions))
        .collect();

    aggregate(&courses, &completions, today, window)
}

pub fn activity_histogram(
    completions: &[LessonCompletion],
    today: NaiveDate,
    window: ActivityWindow,
) -> Vec<DailyActivity> {
    let start = today - Duration::days(window.days() - 1);
    let mut buckets: HashMap<NaiveDate, (u32, u64)> = HashMap::new();

    for completion in completions {
        let day = completion.completed_at.date_naive();
        if day < start || day > today {
            continue;
        }
        let entry = buckets.entry(day).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += u64::from(completion.time_spent_minutes);
    }

    (0..window.days())
        .map(|offset| {
            let date = start + Duration::days(offset);
            let (lessons_completed, minutes) = buckets.get(&date).copied().unwrap_or((0, 0));
            DailyActivity {
                date,
                lessons_completed,
                minutes,
            }
        })
        .collect()
}

fn active_days(completions: &[LessonCompletion], today: NaiveDate) -> BTreeSet<NaiveDate> {
    completions
        .iter()
        .map(|c| c.completed_at.date_naive())
        .filter(|day| *day <= today)
        .collect()
}

/// Consecutive active days ending today, or yesterday when today has no
/// activity yet.
fn current_streak(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut cursor = if days.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };
    let mut streak = 0;
    while days.contains(&cursor) {
        streak += 1;
        cursor -= Duration::days(1);
    }
    streak
}

fn longest_streak(days: &BTreeSet<NaiveDate>) -> u32 {
    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;

    for day in days {
        run = match previous {
            Some(prev) if *day - prev == Duration::days(1) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(*day);
    }

    longest
}

pub fn achievements(aggregate: &ProgressAggregate) -> Vec<AchievementStatus> {
    Achievement::ALL
        .iter()
        .map(|&achievement| {
            let earned = match achievement {
                Achievement::FirstLesson => aggregate.completed_lessons >= 1,
                Achievement::FirstCourseCompleted => aggregate.completed_courses >= 1,
                Achievement::FiveDayStreak => aggregate.longest_streak >= STREAK_TARGET_DAYS,
                Achievement::FiftyHoursLearned => aggregate.total_minutes >= FIFTY_HOURS_IN_MINUTES,
                Achievement::CertificateCollector => {
                    aggregate.completed_courses >= CERTIFICATE_COLLECTOR_COURSES
                }
            };
            AchievementStatus {
                achievement,
                title: achievement.title().to_string(),
                earned,
            }
        })
        .collect()
}

pub fn format_minutes(minutes: u64) -> String {
    let hours = minutes / 60;
    let rest = minutes % 60;
    match (hours, rest) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}
