use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "instructor" => Ok(Role::Instructor),
            "admin" => Ok(Role::Admin),
            other => anyhow::bail!("unknown role: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct Enrollment {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub course_title: String,
    pub total_lessons: u32,
    pub enrolled_at: DateTime<Utc>,
    pub last_accessed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct LessonCompletion {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub lesson_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub time_spent_minutes: u32,
}

/// Raw records for one data scope, as read from the store.
#[derive(Debug, Clone, Default)]
pub struct Cohort {
    pub students: Vec<UserRecord>,
    pub enrollments: Vec<Enrollment>,
    pub completions: Vec<LessonCompletion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub course_id: Uuid,
    pub course_title: String,
    pub completed_lessons: u32,
    pub total_lessons: u32,
    pub percentage: u8,
    pub time_spent_minutes: u64,
    pub enrolled_at: DateTime<Utc>,
    pub last_accessed: Option<DateTime<Utc>>,
}

impl CourseProgress {
    pub fn is_completed(&self) -> bool {
        self.total_lessons > 0 && self.completed_lessons >= self.total_lessons
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub lessons_completed: u32,
    pub minutes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Achievement {
    FirstLesson,
    FirstCourseCompleted,
    FiveDayStreak,
    FiftyHoursLearned,
    CertificateCollector,
}

impl Achievement {
    pub const ALL: [Achievement; 5] = [
        Achievement::FirstLesson,
        Achievement::FirstCourseCompleted,
        Achievement::FiveDayStreak,
        Achievement::FiftyHoursLearned,
        Achievement::CertificateCollector,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Achievement::FirstLesson => "First Lesson",
            Achievement::FirstCourseCompleted => "First Course Completed",
            Achievement::FiveDayStreak => "5-Day Streak",
            Achievement::FiftyHoursLearned => "50 Hours Learned",
            Achievement::CertificateCollector => "Certificate Collector",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementStatus {
    pub achievement: Achievement,
    pub title: String,
    pub earned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressAggregate {
    pub enrolled_courses: usize,
    pub completed_courses: usize,
    pub completed_lessons: u32,
    pub total_lessons: u32,
    pub overall_percentage: u8,
    pub total_minutes: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_active: Option<DateTime<Utc>>,
    pub courses: Vec<CourseProgress>,
    pub activity: Vec<DailyActivity>,
    pub achievements: Vec<AchievementStatus>,
}

impl ProgressAggregate {
    pub fn is_empty(&self) -> bool {
        self.enrolled_courses == 0
    }
}
