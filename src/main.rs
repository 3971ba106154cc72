use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod access;
mod config;
mod db;
mod error;
mod models;
mod progress;
mod report;
mod server;
mod views;

use access::{Scope, Viewer};
use models::{Role, UserRecord};
use progress::{format_minutes, ActivityWindow};
use views::{RosterQuery, RosterRow, SortDirection, SortKey, StudentProgressView};

#[derive(Parser)]
#[command(name = "learnhub-progress")]
#[command(about = "Student progress aggregation for the LearnHub marketplace", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RosterArgs {
    /// Case-insensitive substring of the student's name
    #[arg(long)]
    search: Option<String>,
    #[arg(long, value_enum, default_value_t = SortKey::Name)]
    sort: SortKey,
    #[arg(long, value_enum, default_value_t = SortDirection::Asc)]
    direction: SortDirection,
}

impl RosterArgs {
    fn query(&self) -> RosterQuery {
        RosterQuery {
            search: self.search.clone(),
            sort: self.sort,
            direction: self.direction,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import lesson completions from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record a single lesson completion
    Record {
        #[arg(long)]
        email: String,
        #[arg(long)]
        course: String,
        #[arg(long)]
        lesson: String,
        #[arg(long)]
        minutes: u32,
        /// Completion time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Show a student's own progress
    Progress {
        #[arg(long)]
        email: String,
        #[arg(long, value_enum, default_value_t = ActivityWindow::Week)]
        window: ActivityWindow,
        /// Print the aggregate as JSON
        #[arg(long)]
        json: bool,
    },
    /// List students enrolled in an instructor's courses
    Roster {
        #[arg(long)]
        instructor: String,
        #[command(flatten)]
        roster: RosterArgs,
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Admin analytics across every course
    Analytics {
        /// Show one student's detail instead of the roster
        #[arg(long)]
        student: Option<String>,
        #[arg(long, value_enum, default_value_t = ActivityWindow::Month)]
        window: ActivityWindow,
        #[command(flatten)]
        roster: RosterArgs,
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Export a roster to CSV
    Export {
        /// Limit to this instructor's courses
        #[arg(long)]
        instructor: Option<String>,
        #[command(flatten)]
        roster: RosterArgs,
        #[arg(long, default_value = "student-progress.csv")]
        out: PathBuf,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        instructor: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Serve the progress API over HTTP
    Serve {
        /// Overrides BIND_ADDR
        #[arg(long)]
        bind: Option<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn require_user(pool: &sqlx::PgPool, email: &str, role: Option<Role>) -> anyhow::Result<UserRecord> {
    let user = db::fetch_user_by_email(pool, email)
        .await?
        .with_context(|| format!("no user with email {email}"))?;
    if let Some(role) = role {
        anyhow::ensure!(
            user.role == role,
            "{email} is a {} account, expected {role}",
            user.role
        );
    }
    Ok(user)
}

async fn scope_for(pool: &sqlx::PgPool, instructor: Option<&str>) -> anyhow::Result<Scope> {
    match instructor {
        Some(email) => {
            let user = require_user(pool, email, Some(Role::Instructor)).await?;
            Ok(Viewer::from(&user).roster_scope()?)
        }
        None => Ok(Scope::All),
    }
}

fn print_student(view: &StudentProgressView) {
    let aggregate = &view.aggregate;
    println!("{} ({})", view.student.full_name, view.student.email);

    if aggregate.is_empty() {
        println!("No enrollments yet.");
        return;
    }

    println!(
        "Overall {}% across {} courses ({} completed), {} learned",
        aggregate.overall_percentage,
        aggregate.enrolled_courses,
        aggregate.completed_courses,
        format_minutes(aggregate.total_minutes)
    );
    println!(
        "Streak: {} days (longest {})",
        aggregate.current_streak, aggregate.longest_streak
    );

    println!("Courses:");
    for course in aggregate.courses.iter() {
        println!(
            "- {}: {}/{} lessons ({}%), {}",
            course.course_title,
            course.completed_lessons,
            course.total_lessons,
            course.percentage,
            format_minutes(course.time_spent_minutes)
        );
    }

    println!("Activity:");
    for day in aggregate.activity.iter() {
        println!(
            "- {}: {} lessons, {}",
            day.date,
            day.lessons_completed,
            format_minutes(day.minutes)
        );
    }

    println!("Achievements:");
    for status in aggregate.achievements.iter() {
        let mark = if status.earned { "x" } else { " " };
        println!("- [{mark}] {}", status.title);
    }
}

fn print_roster(rows: &[RosterRow], limit: usize) {
    if rows.is_empty() {
        println!("No students match.");
        return;
    }

    for row in rows.iter().take(limit) {
        println!(
            "- {} ({}) {}% across {} courses, {} learned, last active {}",
            row.name,
            row.email,
            row.overall_percentage,
            row.enrolled_courses,
            format_minutes(row.total_minutes),
            row.last_active
                .map(|t| t.date_naive().to_string())
                .unwrap_or_else(|| "never".to_string())
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let today = Utc::now().date_naive();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} completions from {}.", csv.display());
        }
        Commands::Record {
            email,
            course,
            lesson,
            minutes,
            at,
        } => {
            let input = db::CompletionInput {
                student_name: None,
                student_email: email,
                course_slug: course,
                lesson_slug: lesson,
                completed_at: at.unwrap_or_else(Utc::now),
                time_spent_minutes: i32::try_from(minutes).context("minutes out of range")?,
                source_key: None,
            };
            db::record_completion(&pool, &input).await?;
            println!("Recorded {}/{}.", input.course_slug, input.lesson_slug);
        }
        Commands::Progress {
            email,
            window,
            json,
        } => {
            let student = require_user(&pool, &email, None).await?;
            let cohort = db::fetch_cohort(&pool, Viewer::from(&student).own_scope()).await?;
            let view = views::student_view(student, &cohort, today, window);

            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_student(&view);
            }
        }
        Commands::Roster {
            instructor,
            roster,
            limit,
        } => {
            let scope = scope_for(&pool, Some(&instructor)).await?;
            let cohort = db::fetch_cohort(&pool, scope).await?;
            let rows = views::roster(&cohort, today, &roster.query());
            print_roster(&rows, limit);
        }
        Commands::Analytics {
            student,
            window,
            roster,
            limit,
        } => match student {
            Some(email) => {
                let student = require_user(&pool, &email, Some(Role::Student)).await?;
                let cohort = db::fetch_cohort(&pool, Scope::Student(student.id)).await?;
                print_student(&views::student_view(student, &cohort, today, window));
            }
            None => {
                let cohort = db::fetch_cohort(&pool, Scope::All).await?;
                let rows = views::roster(&cohort, today, &roster.query());
                print_roster(&rows, limit);
            }
        },
        Commands::Export {
            instructor,
            roster,
            out,
        } => {
            let scope = scope_for(&pool, instructor.as_deref()).await?;
            let cohort = db::fetch_cohort(&pool, scope).await?;
            let rows = views::roster(&cohort, today, &roster.query());
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::write_csv(&rows, file)?;
            println!("Exported {} students to {}.", rows.len(), out.display());
        }
        Commands::Report { instructor, out } => {
            let scope = scope_for(&pool, instructor.as_deref()).await?;
            let cohort = db::fetch_cohort(&pool, scope).await?;
            let rows = views::roster(&cohort, today, &RosterQuery::default());
            let report = report::build_report(instructor.as_deref(), today, &rows);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve { bind } => {
            let bind_addr = bind.unwrap_or(config.bind_addr);
            info!("starting progress API");
            server::serve(pool, &bind_addr).await?;
        }
    }

    Ok(())
}
