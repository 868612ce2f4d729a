use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quiz_core::model::{Quiz, QuizId, UserId};
use quiz_core::Verdict;
use services::{
    ApiConfig, Clock, HttpApi, InMemoryApi, ProgressRemote, QuizSessionService, QuizSource,
    SessionCommand, SessionDriver, SessionHandle, SessionView, SettingsSource,
};
use storage::Storage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    NoQuizSource,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::NoQuizSource => {
                write!(f, "set QUIZ_API_BASE_URL or pass --quiz-file <path>")
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

fn parse_id(value: &str, flag: &'static str) -> Result<u64, ArgsError> {
    value.trim().parse().map_err(|_| ArgsError::InvalidId {
        flag,
        raw: value.to_string(),
    })
}

struct Args {
    db_url: String,
    quiz_id: QuizId,
    user_id: Option<UserId>,
    quiz_file: Option<PathBuf>,
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- [--db <sqlite_url>] [--quiz-id <id>] [--user-id <id>] [--quiz-file <path>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:quiz.sqlite3");
    eprintln!("  --quiz-id 1");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_DB_URL, QUIZ_ID, QUIZ_USER_ID");
    eprintln!("  QUIZ_API_BASE_URL, QUIZ_API_TOKEN, QUIZ_DEVICE_NAME, QUIZ_DEVICE_CLASS");
    eprintln!("  RUST_LOG (e.g. RUST_LOG=services=debug)");
    eprintln!();
    eprintln!("While playing: answer numbers (e.g. `1 3`), `n` next, `r` reset, `s on|off` sync, `q` quit");
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("QUIZ_DB_URL")
            .ok()
            .map_or_else(|| normalize_sqlite_url("quiz.sqlite3".into()), normalize_sqlite_url);
        let mut quiz_id = match std::env::var("QUIZ_ID") {
            Ok(raw) => QuizId::new(parse_id(&raw, "QUIZ_ID")?),
            Err(_) => QuizId::new(1),
        };
        let mut user_id = match std::env::var("QUIZ_USER_ID") {
            Ok(raw) => Some(UserId::new(parse_id(&raw, "QUIZ_USER_ID")?)),
            Err(_) => None,
        };
        let mut quiz_file = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--quiz-id" => {
                    let value = require_value(args, "--quiz-id")?;
                    quiz_id = QuizId::new(parse_id(&value, "--quiz-id")?);
                }
                "--user-id" => {
                    let value = require_value(args, "--user-id")?;
                    user_id = Some(UserId::new(parse_id(&value, "--user-id")?));
                }
                "--quiz-file" => {
                    quiz_file = Some(PathBuf::from(require_value(args, "--quiz-file")?));
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
            quiz_id,
            user_id,
            quiz_file,
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
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
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

struct Collaborators {
    quizzes: Arc<dyn QuizSource>,
    settings: Arc<dyn SettingsSource>,
    remote: Option<Arc<dyn ProgressRemote>>,
}

/// A local quiz file wins over the HTTP services.
fn collaborators(args: &Args) -> Result<Collaborators, Box<dyn std::error::Error>> {
    if let Some(path) = &args.quiz_file {
        let quiz: Quiz = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        info!(path = %path.display(), quiz_id = %quiz.id, "using quiz file");
        let api = InMemoryApi::new().with_quiz(quiz);
        return Ok(Collaborators {
            quizzes: Arc::new(api.clone()),
            settings: Arc::new(api),
            remote: None,
        });
    }

    let config = ApiConfig::from_env().ok_or(ArgsError::NoQuizSource)?;
    let api = HttpApi::new(config);
    let remote: Option<Arc<dyn ProgressRemote>> = if api.is_authenticated() {
        Some(Arc::new(api.clone()))
    } else {
        None
    };
    Ok(Collaborators {
        quizzes: Arc::new(api.clone()),
        settings: Arc::new(api),
        remote,
    })
}

fn print_view(view: &SessionView) {
    println!();
    println!(
        "{} | correct {} | wrong {} | mastered {}/{} | {}s{}",
        view.quiz_title,
        view.correct_count,
        view.wrong_count,
        view.mastered_count,
        view.total_questions,
        view.study_time_seconds,
        if view.sync_enabled { " | sync on" } else { "" },
    );
    let Some(question) = &view.question else {
        println!("Finished! Type `r` to start over or `q` to quit.");
        return;
    };
    println!("{}", question.prompt);
    for (index, answer) in question.answers.iter().enumerate() {
        let marker = if view.is_selected(answer.id) { "*" } else { " " };
        let reveal = match (view.checked, answer.correct) {
            (Some(_), true) => " (correct)",
            _ => "",
        };
        println!("  {marker}{}. {}{reveal}", index + 1, answer.text);
    }
    match view.checked {
        Some(Verdict::Correct) => println!("Correct. Type `n` for the next question."),
        Some(Verdict::Incorrect) => println!("Incorrect. Type `n` for the next question."),
        None => {}
    }
}

fn parse_command(line: &str, view: &SessionView) -> Option<SessionCommand> {
    let line = line.trim();
    match line {
        "q" | "quit" => return Some(SessionCommand::Close),
        "n" | "next" => return Some(SessionCommand::Advance),
        "r" | "reset" => return Some(SessionCommand::Reset),
        "s on" => return Some(SessionCommand::SetSync(true)),
        "s off" => return Some(SessionCommand::SetSync(false)),
        _ => {}
    }

    let question = view.question.as_ref()?;
    let mut answers = Vec::new();
    for token in line.split([' ', ',']).filter(|token| !token.is_empty()) {
        let index: usize = token.parse().ok()?;
        answers.push(question.answers.get(index.checked_sub(1)?)?.id);
    }
    if answers.is_empty() {
        return None;
    }
    Some(SessionCommand::Submit(answers))
}

async fn play(mut handle: SessionHandle) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_view(&handle.view());

    while let Some(line) = lines.next_line().await? {
        let view = handle.view();
        let Some(command) = parse_command(&line, &view) else {
            println!("?");
            continue;
        };
        let closing = command == SessionCommand::Close;
        if !handle.send(command) || closing {
            break;
        }
        // Unchanged views are not republished; don't wait forever for one.
        if let Ok(Some(view)) = tokio::time::timeout(Duration::from_millis(500), handle.changed()).await {
            print_view(&view);
        }
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut iter = std::env::args().skip(1);
    let args = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&args.db_url)?;
    let storage = Storage::sqlite(&args.db_url).await?;
    let collaborators = collaborators(&args)?;

    let mut service = QuizSessionService::new(
        Clock::System,
        collaborators.quizzes,
        collaborators.settings,
        Arc::clone(&storage.local),
    );
    if let (Some(user_id), Some(remote)) = (args.user_id, collaborators.remote) {
        service = service.with_account(user_id, remote);
    }

    let session = service.open(args.quiz_id).await?;
    let (driver, handle) = SessionDriver::new(session);
    let driver = tokio::spawn(driver.run());

    let played = play(handle).await;
    let session = driver.await?;
    info!(
        correct = session.progress().correct_count,
        wrong = session.progress().wrong_count,
        "session closed"
    );
    played
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
