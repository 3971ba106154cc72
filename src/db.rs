use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::access::Scope;
use crate::models::{Cohort, Enrollment, LessonCompletion, Role, UserRecord};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("migrations applied");
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let users = vec![
        (
            Uuid::parse_str("6b1f8a52-3c1e-4d7a-9f55-1a2b3c4d5e61")?,
            "Maria Santos",
            "maria.santos@learnhub.dev",
            Role::Instructor,
        ),
        (
            Uuid::parse_str("8e2d4c7b-5a19-4f3e-b6d2-7c8e9f0a1b22")?,
            "David Kim",
            "david.kim@learnhub.dev",
            Role::Instructor,
        ),
        (
            Uuid::parse_str("1a9c3e5f-7b2d-4e6a-8c0f-2d4b6a8c0e13")?,
            "Priya Shah",
            "priya.shah@learnhub.dev",
            Role::Admin,
        ),
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Jennifer Lee",
            "jennifer.lee@learnhub.dev",
            Role::Student,
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Robert Garcia",
            "robert.garcia@learnhub.dev",
            Role::Student,
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Aisha Khan",
            "aisha.khan@learnhub.dev",
            Role::Student,
        ),
    ];

    for (id, name, email, role) in users {
        upsert_user(pool, id, name, email, role).await?;
    }

    let courses = vec![
        (
            "rust-fundamentals",
            "Rust Fundamentals",
            "maria.santos@learnhub.dev",
            vec![
                "ownership",
                "borrowing",
                "lifetimes",
                "traits",
                "error-handling",
            ],
        ),
        (
            "async-rust",
            "Async Rust in Practice",
            "maria.santos@learnhub.dev",
            vec!["futures", "tokio-runtime", "channels", "cancellation"],
        ),
        (
            "web-design-basics",
            "Web Design Basics",
            "david.kim@learnhub.dev",
            vec!["layout", "typography", "color"],
        ),
    ];

    for (slug, title, instructor_email, lessons) in courses {
        let instructor = fetch_user_by_email(pool, instructor_email)
            .await?
            .with_context(|| format!("seed instructor {instructor_email} missing"))?;
        upsert_course(pool, slug, title, instructor.id, &lessons).await?;
    }

    let now = Utc::now();
    let completions = vec![
        ("seed-001", "jennifer.lee@learnhub.dev", "rust-fundamentals", "ownership", 4, 35),
        ("seed-002", "jennifer.lee@learnhub.dev", "rust-fundamentals", "borrowing", 3, 40),
        ("seed-003", "jennifer.lee@learnhub.dev", "rust-fundamentals", "lifetimes", 2, 55),
        ("seed-004", "jennifer.lee@learnhub.dev", "rust-fundamentals", "traits", 1, 45),
        ("seed-005", "jennifer.lee@learnhub.dev", "rust-fundamentals", "error-handling", 0, 30),
        ("seed-006", "jennifer.lee@learnhub.dev", "async-rust", "futures", 0, 25),
        ("seed-007", "robert.garcia@learnhub.dev", "rust-fundamentals", "ownership", 12, 30),
        ("seed-008", "robert.garcia@learnhub.dev", "rust-fundamentals", "borrowing", 9, 45),
        ("seed-009", "robert.garcia@learnhub.dev", "web-design-basics", "layout", 6, 90),
        ("seed-010", "aisha.khan@learnhub.dev", "web-design-basics", "layout", 20, 50),
    ];

    for (source_key, email, course, lesson, days_ago, minutes) in completions {
        let input = CompletionInput {
            student_name: None,
            student_email: email.to_string(),
            course_slug: course.to_string(),
            lesson_slug: lesson.to_string(),
            completed_at: now - Duration::days(days_ago),
            time_spent_minutes: minutes,
            source_key: Some(source_key.to_string()),
        };
        record_completion(pool, &input).await?;
    }

    // Enrolled through checkout but not started yet.
    enroll_by_email(pool, "aisha.khan@learnhub.dev", "async-rust", now - Duration::days(2)).await?;

    info!("seed data loaded");
    Ok(())
}

async fn upsert_user<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
    name: &str,
    email: &str,
    role: Role,
) -> anyhow::Result<UserRecord> {
    let row = sqlx::query(
        r#"
        INSERT INTO learning_progress.users (id, full_name, email, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name
        RETURNING id, full_name, email, role
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(email)
    .bind(role.as_str())
    .fetch_one(executor)
    .await?;
    user_from_row(&row)
}

/// Creates or updates a course and its lessons, numbered in slice order.
async fn upsert_course(
    pool: &PgPool,
    slug: &str,
    title: &str,
    instructor_id: Uuid,
    lessons: &[&str],
) -> anyhow::Result<Uuid> {
    let mut tx = pool.begin().await?;

    let course_id: Uuid = sqlx::query(
        r#"
        INSERT INTO learning_progress.courses (id, slug, title, instructor_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (slug) DO UPDATE
        SET title = EXCLUDED.title, instructor_id = EXCLUDED.instructor_id
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(slug)
    .bind(title)
    .bind(instructor_id)
    .fetch_one(&mut *tx)
    .await?
    .get("id");

    for (position, lesson_slug) in lessons.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO learning_progress.lessons (id, course_id, slug, title, position)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (course_id, slug) DO UPDATE
            SET title = EXCLUDED.title, position = EXCLUDED.position
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(course_id)
        .bind(*lesson_slug)
        .bind(lesson_slug.replace('-', " "))
        .bind(position as i32 + 1)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(course_id)
}

/// Only student accounts can hold enrollments.
pub fn ensure_student(user: &UserRecord) -> anyhow::Result<()> {
    anyhow::ensure!(
        user.role == Role::Student,
        "{} has the {} role, only students can enroll",
        user.email,
        user.role
    );
    Ok(())
}

async fn enroll_by_email(
    pool: &PgPool,
    email: &str,
    course_slug: &str,
    enrolled_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    let student = fetch_user_by_email(pool, email)
        .await?
        .with_context(|| format!("unknown student {email}"))?;
    ensure_student(&student)?;
    let course_id = course_id_by_slug(pool, course_slug).await?;
    ensure_enrollment(pool, student.id, course_id, enrolled_at).await
}

async fn ensure_enrollment<'e>(
    executor: impl PgExecutor<'e>,
    student_id: Uuid,
    course_id: Uuid,
    enrolled_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO learning_progress.enrollments (student_id, course_id, enrolled_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (student_id, course_id) DO NOTHING
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .bind(enrolled_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn course_id_by_slug(pool: &PgPool, slug: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query("SELECT id FROM learning_progress.courses WHERE slug = $1")
        .bind(slug)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("unknown course {slug}"))?
        .get("id");
    Ok(id)
}

/// One lesson-completion event, keyed by slugs as it arrives from imports.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CompletionInput {
    pub student_name: Option<String>,
    pub student_email: String,
    pub course_slug: String,
    pub lesson_slug: String,
    pub completed_at: DateTime<Utc>,
    pub time_spent_minutes: i32,
    pub source_key: Option<String>,
}

/// Appends a completion event. Returns false when the source key was
/// already recorded.
pub async fn record_completion(pool: &PgPool, input: &CompletionInput) -> anyhow::Result<bool> {
    anyhow::ensure!(
        input.time_spent_minutes >= 0,
        "time spent must not be negative (got {})",
        input.time_spent_minutes
    );

    let mut tx = pool.begin().await?;

    let student = match fetch_user_by_email(&mut *tx, &input.student_email).await? {
        Some(user) => user,
        None => {
            let name = input
                .student_name
                .as_deref()
                .with_context(|| format!("unknown student {} and no name given", input.student_email))?;
            let user =
                upsert_user(&mut *tx, Uuid::new_v4(), name, &input.student_email, Role::Student)
                    .await?;
            info!(email = %input.student_email, "created student");
            user
        }
    };
    ensure_student(&student)?;

    let lesson = sqlx::query(
        r#"
        SELECT l.id AS lesson_id, c.id AS course_id
        FROM learning_progress.lessons l
        JOIN learning_progress.courses c ON c.id = l.course_id
        WHERE c.slug = $1 AND l.slug = $2
        "#,
    )
    .bind(&input.course_slug)
    .bind(&input.lesson_slug)
    .fetch_optional(&mut *tx)
    .await?
    .with_context(|| format!("unknown lesson {}/{}", input.course_slug, input.lesson_slug))?;
    let lesson_id: Uuid = lesson.get("lesson_id");
    let course_id: Uuid = lesson.get("course_id");

    ensure_enrollment(&mut *tx, student.id, course_id, input.completed_at).await?;

    let source_key = input
        .source_key
        .clone()
        .unwrap_or_else(|| format!("record-{}", Uuid::new_v4()));

    let result = sqlx::query(
        r#"
        INSERT INTO learning_progress.lesson_completions
        (id, student_id, course_id, lesson_id, completed_at, time_spent_minutes, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student.id)
    .bind(course_id)
    .bind(lesson_id)
    .bind(input.completed_at)
    .bind(input.time_spent_minutes)
    .bind(&source_key)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        debug!(%source_key, "completion already recorded");
        return Ok(false);
    }

    sqlx::query(
        r#"
        UPDATE learning_progress.enrollments
        SET last_accessed = GREATEST(COALESCE(last_accessed, $3), $3)
        WHERE student_id = $1 AND course_id = $2
        "#,
    )
    .bind(student.id)
    .bind(course_id)
    .bind(input.completed_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CompletionInput>().enumerate() {
        let row = result.with_context(|| format!("malformed row {}", line + 1))?;
        if record_completion(pool, &row)
            .await
            .with_context(|| format!("failed to import row {}", line + 1))?
        {
            inserted += 1;
        }
    }

    Ok(inserted)
}

fn user_from_row(row: &PgRow) -> anyhow::Result<UserRecord> {
    let role: String = row.get("role");
    Ok(UserRecord {
        id: row.get("id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        role: role.parse()?,
    })
}

pub async fn fetch_user(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<UserRecord>> {
    sqlx::query("SELECT id, full_name, email, role FROM learning_progress.users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .as_ref()
        .map(user_from_row)
        .transpose()
}

pub async fn fetch_user_by_email<'e>(
    executor: impl PgExecutor<'e>,
    email: &str,
) -> anyhow::Result<Option<UserRecord>> {
    sqlx::query("SELECT id, full_name, email, role FROM learning_progress.users WHERE email = $1")
        .bind(email)
        .fetch_optional(executor)
        .await?
        .as_ref()
        .map(user_from_row)
        .transpose()
}

fn scope_filter(scope: Scope) -> (&'static str, Option<Uuid>) {
    match scope {
        Scope::Student(id) => (" WHERE e.student_id = $1", Some(id)),
        Scope::Instructor(id) => (" WHERE c.instructor_id = $1", Some(id)),
        Scope::All => ("", None),
    }
}

/// Reads students, enrollments and completions visible under `scope`.
///
/// Completions are limited to enrolled courses in scope, so an instructor's
/// view of a student never includes another instructor's courses. The three
/// reads share one repeatable-read snapshot.
pub async fn fetch_cohort(pool: &PgPool, scope: Scope) -> anyhow::Result<Cohort> {
    let (filter, id) = scope_filter(scope);

    let students_sql = format!(
        r#"
        SELECT DISTINCT u.id, u.full_name, u.email, u.role
        FROM learning_progress.enrollments e
        JOIN learning_progress.users u ON u.id = e.student_id
        JOIN learning_progress.courses c ON c.id = e.course_id
        {filter}
        ORDER BY u.full_name, u.id
        "#
    );
    let enrollments_sql = format!(
        r#"
        SELECT e.student_id, e.course_id, c.title, e.enrolled_at, e.last_accessed,
               (SELECT COUNT(*) FROM learning_progress.lessons l WHERE l.course_id = c.id)
                   AS total_lessons
        FROM learning_progress.enrollments e
        JOIN learning_progress.courses c ON c.id = e.course_id
        {filter}
        ORDER BY e.enrolled_at
        "#
    );
    let completions_sql = format!(
        r#"
        SELECT lc.student_id, lc.course_id, lc.lesson_id, lc.completed_at, lc.time_spent_minutes
        FROM learning_progress.lesson_completions lc
        JOIN learning_progress.enrollments e
          ON e.student_id = lc.student_id AND e.course_id = lc.course_id
        JOIN learning_progress.courses c ON c.id = lc.course_id
        {filter}
        ORDER BY lc.completed_at
        "#
    );

    let mut students_query = sqlx::query(&students_sql);
    let mut enrollments_query = sqlx::query(&enrollments_sql);
    let mut completions_query = sqlx::query(&completions_sql);
    if let Some(value) = id {
        students_query = students_query.bind(value);
        enrollments_query = enrollments_query.bind(value);
        completions_query = completions_query.bind(value);
    }

    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await?;

    let students = students_query
        .fetch_all(&mut *tx)
        .await
        .context("failed to fetch students")?
        .iter()
        .map(user_from_row)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let enrollments = enrollments_query
        .fetch_all(&mut *tx)
        .await
        .context("failed to fetch enrollments")?
        .into_iter()
        .map(|row| {
            let total_lessons: i64 = row.get("total_lessons");
            Enrollment {
                student_id: row.get("student_id"),
                course_id: row.get("course_id"),
                course_title: row.get("title"),
                total_lessons: u32::try_from(total_lessons).unwrap_or(0),
                enrolled_at: row.get("enrolled_at"),
                last_accessed: row.get("last_accessed"),
            }
        })
        .collect::<Vec<_>>();

    let completions = completions_query
        .fetch_all(&mut *tx)
        .await
        .context("failed to fetch lesson completions")?
        .into_iter()
        .map(|row| {
            let minutes: i32 = row.get("time_spent_minutes");
            LessonCompletion {
                student_id: row.get("student_id"),
                course_id: row.get("course_id"),
                lesson_id: row.get("lesson_id"),
                completed_at: row.get("completed_at"),
                time_spent_minutes: u32::try_from(minutes).unwrap_or(0),
            }
        })
        .collect::<Vec<_>>();

    tx.commit().await?;

    debug!(
        ?scope,
        students = students.len(),
        enrollments = enrollments.len(),
        completions = completions.len(),
        "cohort fetched"
    );

    Ok(Cohort {
        students,
        enrollments,
        completions,
    })
}
