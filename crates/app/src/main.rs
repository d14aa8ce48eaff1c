use std::fmt;
use std::path::PathBuf;

use lms_core::model::remote_row::HEADERS;
use lms_core::model::{ChapterKey, RemoteProgressRow, Roster, UserId};
use services::{AppContext, Clock, OverviewSource, ProgressOverview, SyncConfig, SyncRunOutcome};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { command: &'static str, flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidUserId { raw: String },
    InvalidChapter { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { command, flag } => write!(f, "{command} requires {flag}"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidUserId { raw } => write!(f, "invalid --user value: {raw}"),
            ArgsError::InvalidChapter { raw } => {
                write!(f, "invalid --chapter value: {raw} (expected lesson_chapter)")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- status   [--user <id>]");
    eprintln!("  cargo run -p app -- sync");
    eprintln!("  cargo run -p app -- watch");
    eprintln!("  cargo run -p app -- complete --user <id> --chapter <lesson_chapter>");
    eprintln!("  cargo run -p app -- overview");
    eprintln!("  cargo run -p app -- export                 # local progress as sheet rows (TSV)");
    eprintln!("  cargo run -p app -- login    --user <id> --password <password>");
    eprintln!("  cargo run -p app -- logout");
    eprintln!("  cargo run -p app -- reset    --user <id>   # admin session required");
    eprintln!();
    eprintln!("Common flags:");
    eprintln!("  --db <sqlite_url>     default sqlite://lms.sqlite3");
    eprintln!("  --roster <path>       JSON roster of accounts");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LMS_DB_URL, LMS_ROSTER_PATH, RUST_LOG");
    eprintln!("  LMS_WRITE_URL, LMS_WRITE_RESPONSE (opaque|json)");
    eprintln!("  LMS_SHEETS_BASE_URL, LMS_SPREADSHEET_ID, LMS_SHEET_RANGE, LMS_API_KEY");
    eprintln!("  LMS_SYNC_INTERVAL_SECS, LMS_MAX_RETRY_ATTEMPTS, LMS_RETRY_DELAY_MS");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Status,
    Sync,
    Watch,
    Complete,
    Overview,
    Export,
    Login,
    Logout,
    Reset,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "status" => Some(Self::Status),
            "sync" => Some(Self::Sync),
            "watch" => Some(Self::Watch),
            "complete" => Some(Self::Complete),
            "overview" => Some(Self::Overview),
            "export" => Some(Self::Export),
            "login" => Some(Self::Login),
            "logout" => Some(Self::Logout),
            "reset" => Some(Self::Reset),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Sync => "sync",
            Self::Watch => "watch",
            Self::Complete => "complete",
            Self::Overview => "overview",
            Self::Export => "export",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Reset => "reset",
        }
    }
}

struct Args {
    db_url: String,
    roster_path: Option<PathBuf>,
    user: Option<UserId>,
    chapter: Option<ChapterKey>,
    password: Option<String>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("LMS_DB_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map_or_else(|| "sqlite://lms.sqlite3".into(), normalize_sqlite_url);
        let mut roster_path = std::env::var_os("LMS_ROSTER_PATH").map(PathBuf::from);
        let mut user = None;
        let mut chapter = None;
        let mut password = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--roster" => {
                    roster_path = Some(PathBuf::from(require_value(args, "--roster")?));
                }
                "--user" => {
                    let value = require_value(args, "--user")?;
                    user = Some(
                        UserId::new(value.trim())
                            .map_err(|_| ArgsError::InvalidUserId { raw: value.clone() })?,
                    );
                }
                "--chapter" => {
                    let value = require_value(args, "--chapter")?;
                    chapter = Some(
                        value
                            .trim()
                            .parse::<ChapterKey>()
                            .map_err(|_| ArgsError::InvalidChapter { raw: value.clone() })?,
                    );
                }
                "--password" => {
                    password = Some(require_value(args, "--password")?);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            roster_path,
            user,
            chapter,
            password,
        })
    }

    fn user(&self, command: Command) -> Result<&UserId, ArgsError> {
        self.user.as_ref().ok_or(ArgsError::MissingFlag {
            command: command.name(),
            flag: "--user",
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn load_roster(path: Option<&PathBuf>) -> Result<Roster, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        tracing::debug!("no roster configured; login is unavailable");
        return Ok(Roster::default());
    };
    let raw = std::fs::read_to_string(path)?;
    Ok(Roster::from_json(&raw)?)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_overview(overview: &ProgressOverview) {
    let source = match overview.source {
        OverviewSource::Remote => "remote",
        OverviewSource::Local => "local",
    };
    println!("source: {source}");
    for row in &overview.rows {
        println!(
            "{:<12} {:<24} {:>3}/{:<3} {:>3}%",
            row.user_id.as_str(),
            row.user_name.as_deref().unwrap_or("-"),
            row.completed_count.unwrap_or(0),
            row.total_chapters.unwrap_or(0),
            row.completion_rate.unwrap_or(0),
        );
    }
}

fn sheet_lines(rows: &[RemoteProgressRow]) -> Vec<String> {
    std::iter::once(HEADERS.join("\t"))
        .chain(rows.iter().map(|row| row.to_cells().join("\t")))
        .collect()
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    init_tracing();

    prepare_sqlite_file(&parsed.db_url)?;
    let config = SyncConfig::from_env();
    let roster = load_roster(parsed.roster_path.as_ref())?;
    let ctx =
        AppContext::new_sqlite(&parsed.db_url, &config, roster, Clock::default_clock()).await?;

    match cmd {
        Command::Status => {
            let status = ctx.scheduler().status();
            println!(
                "last sync: {}",
                status
                    .last_sync_time
                    .map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
            );
            println!("interval:  {}s", status.interval.as_secs());
            match ctx.auth().current_session().await? {
                Some(session) => println!("session:   {} ({})", session.name, session.user_id),
                None => println!("session:   none"),
            }
            if let Some(user) = parsed.user.as_ref() {
                let progress = ctx.progress().progress(user).await;
                println!(
                    "{user}: {}/{} chapters, {}%",
                    progress.completed_count(),
                    progress.total_chapters(),
                    progress.completion_rate()
                );
                for lesson in ctx.progress().catalog().lessons() {
                    let rate = ctx.progress().lesson_rate(user, &lesson.id).await;
                    println!("  {:<10} {:>3}%  {}", lesson.id.as_str(), rate, lesson.title);
                }
                for entry in ctx.activity().recent_for(user, 5).await {
                    println!(
                        "  {} {:?} {}",
                        entry.timestamp.to_rfc3339(),
                        entry.kind,
                        entry.chapter.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Command::Sync => match ctx.scheduler().sync_now().await {
            SyncRunOutcome::Completed(summary) => println!(
                "synced: {} rows, {} users updated, {} chapters added, {} malformed rows",
                summary.users_seen,
                summary.users_updated,
                summary.chapters_added,
                summary.malformed_rows
            ),
            SyncRunOutcome::Skipped => println!("sync already in progress"),
            SyncRunOutcome::Failed(err) => println!("sync failed: {err}"),
            SyncRunOutcome::Disabled => println!("no read endpoint configured"),
        },
        Command::Watch => {
            ctx.start().await;
            tokio::signal::ctrl_c().await?;
            ctx.shutdown();
        }
        Command::Complete => {
            let user = parsed.user(cmd)?;
            let chapter = parsed.chapter.clone().ok_or(ArgsError::MissingFlag {
                command: cmd.name(),
                flag: "--chapter",
            })?;
            let completion = ctx.progress().complete_chapter(user, chapter).await?;
            if completion.newly_completed {
                println!(
                    "{user}: {}/{} chapters, {}%",
                    completion.progress.completed_count(),
                    completion.progress.total_chapters(),
                    completion.progress.completion_rate()
                );
            } else {
                println!("{user}: chapter already completed");
            }
            if completion.saved.is_some_and(|status| !status.is_persisted()) {
                println!("storage unavailable; progress kept for this session only");
            }
            if let Some(push) = completion.push {
                let report = push.await?;
                if !report.is_delivered() {
                    println!("saved locally; remote sync failed");
                }
            }
        }
        Command::Overview => {
            print_overview(&ctx.progress().remote_overview().await);
        }
        Command::Export => {
            for line in sheet_lines(&ctx.progress().local_overview().await.rows) {
                println!("{line}");
            }
        }
        Command::Login => {
            let user = parsed.user(cmd)?;
            let password = parsed.password.as_deref().unwrap_or_default();
            let session = ctx.auth().login(user.as_str(), password).await?;
            println!("logged in as {} ({:?})", session.name, session.role);
        }
        Command::Logout => match ctx.auth().logout().await? {
            Some(session) => println!("logged out {}", session.user_id),
            None => println!("no active session"),
        },
        Command::Reset => {
            let user = parsed.user(cmd)?;
            ctx.auth().require_admin().await?;
            ctx.progress().reset(user).await;
            println!("{user}: progress reset");
        }
    }

    ctx.shutdown();
    Ok(())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, ArgsError> {
        let mut iter = args.iter().map(|s| (*s).to_string());
        Args::parse(&mut iter)
    }

    #[test]
    fn parses_user_and_chapter() {
        let args = parse(&["--user", "user001", "--chapter", "lesson1_chapter2"]).unwrap();
        assert_eq!(args.user.unwrap().as_str(), "user001");
        assert_eq!(args.chapter.unwrap().to_string(), "lesson1_chapter2");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            parse(&["--chapter", "lesson1"]),
            Err(ArgsError::InvalidChapter { .. })
        ));
        assert!(matches!(
            parse(&["--user", "a b"]),
            Err(ArgsError::InvalidUserId { .. })
        ));
        assert!(matches!(parse(&["--db"]), Err(ArgsError::MissingValue { .. })));
        assert!(matches!(parse(&["--nope"]), Err(ArgsError::UnknownArg(_))));
    }

    #[test]
    fn sqlite_urls_are_made_absolute() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:".into()), "sqlite::memory:");
        assert_eq!(
            normalize_sqlite_url("sqlite:///tmp/lms.db".into()),
            "sqlite:///tmp/lms.db"
        );
        assert_eq!(normalize_sqlite_url("/tmp/lms.db".into()), "sqlite:///tmp/lms.db");
    }

    #[test]
    fn export_writes_header_then_rows() {
        let row = RemoteProgressRow::parse(&[
            "user001",
            "User 1",
            "27",
            "1",
            "4",
            "2023-11-14T22:13:20+00:00",
            "lesson1_chapter1",
        ])
        .unwrap();
        let lines = sheet_lines(&[row]);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("userId\tuserName"));
        assert_eq!(
            lines[1],
            "user001\tUser 1\t27\t1\t4\t2023-11-14T22:13:20+00:00\tlesson1_chapter1"
        );
    }

    #[test]
    fn missing_roster_means_empty() {
        assert!(load_roster(None).unwrap().is_empty());
    }
}
