// SPDX-License-Identifier: MPL-2.0

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use codekrafts::config::{APP_ID, APP_NAME, Config, ENV_PREFIX};
use codekrafts::services::Screen;
use codekrafts::state::SessionManager;
use codekrafts::sync::FeedItem;
use codekrafts::util::{initials, time_ago_from};
use codekrafts::{App, runtime};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to let background view tracking finish before exiting.
const VIEW_TRACKING_GRACE: Duration = Duration::from_secs(3);

enum Command {
    Feed,
    Login(String),
    Logout,
}

fn parse_args() -> Result<Command, String> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None | Some("feed") => Ok(Command::Feed),
        Some("login") => args
            .next()
            .map(Command::Login)
            .ok_or_else(|| "usage: codekrafts login <email>".to_string()),
        Some("logout") => Ok(Command::Logout),
        Some(other) => Err(format!(
            "unknown command '{other}'\nusage: codekrafts [feed|login <email>|logout]"
        )),
    }
}

fn print_setup_instructions(problem: &str) {
    eprintln!("{APP_NAME} is not set up: {problem}");
    eprintln!();
    eprintln!("Provide the backend endpoint and public API key, either as environment");
    eprintln!("variables (or in a .env file):");
    eprintln!("    {ENV_PREFIX}_URL=https://your-project.example.co");
    eprintln!("    {ENV_PREFIX}_ANON_KEY=your-public-key");
    eprintln!("or in ~/.config/{APP_ID}/config.toml:");
    eprintln!("    url = \"https://your-project.example.co\"");
    eprintln!("    anon_key = \"your-public-key\"");
}

fn flush_notices(app: &App) {
    for notice in app.notifier().drain() {
        eprintln!("{notice}");
    }
}

fn print_item(item: &FeedItem) {
    let post = &item.post;
    println!(
        "[{}] {} (@{}) · {}",
        initials(item.author.label()),
        item.author.label(),
        item.author.username,
        time_ago_from(post.created_at, Utc::now())
    );
    println!("  {} [{}]", post.title, post.kind);
    if let Some(snippet) = &post.code_snippet {
        let language = post.code_language.as_deref().unwrap_or("text");
        println!("  ```{}", language.to_lowercase());
        for line in snippet.lines() {
            println!("  {line}");
        }
        println!("  ```");
    }
    if let Some(url) = &post.content_url {
        println!("  {} {url}", if post.is_video() { "video:" } else { "image:" });
    }
    let heart = if item.liked_by_viewer { "♥" } else { "♡" };
    println!("  {heart} {}  💬 {}", item.like_count, item.comment_count);
    println!();
}

async fn show_feed(app: &App) -> ExitCode {
    let items = match app.feed().load().await {
        Screen::Ready(items) => items,
        Screen::SetupRequired(what) => {
            print_setup_instructions(&what);
            return ExitCode::FAILURE;
        }
        Screen::NotFound | Screen::Unavailable => return ExitCode::FAILURE,
    };

    if items.is_empty() {
        println!("No posts yet. Be the first to share something!");
        return ExitCode::SUCCESS;
    }

    let viewer = app.session().user_id();
    let mut tracking = Vec::new();
    for item in &items {
        print_item(item);
        if let Some(handle) = app.views().track_view(&item.post.id, viewer.as_deref()) {
            tracking.push(handle);
        }
    }

    let drained = tokio::time::timeout(VIEW_TRACKING_GRACE, async {
        for handle in tracking {
            let _ = handle.await;
        }
    })
    .await;
    if drained.is_err() {
        debug!("view tracking still running at exit");
    }
    ExitCode::SUCCESS
}

fn read_password() -> io::Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn login(app: &App, email: &str) -> ExitCode {
    let password = match read_password() {
        Ok(password) => password,
        Err(e) => {
            eprintln!("Could not read password: {e}");
            return ExitCode::FAILURE;
        }
    };

    match app.auth().sign_in(email, &password).await {
        Ok(session) => {
            if let Err(e) = SessionManager::store(&session).await {
                warn!(error = %e, "could not persist session");
            }
            println!("Welcome back!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn logout(app: &App) -> ExitCode {
    app.auth().sign_out().await;
    if let Err(e) = SessionManager::clear().await {
        warn!(error = %e, "could not clear persisted session");
    }
    println!("Signed out");
    ExitCode::SUCCESS
}

async fn resume_session(app: &App) {
    match SessionManager::load().await {
        Ok(session) => {
            info!(user_id = %session.user_id(), "resuming session");
            app.auth().resume(session);
        }
        Err(e) => debug!(error = %e, "no stored session"),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codekrafts=info".into()),
        )
        .init();

    let command = match parse_args() {
        Ok(command) => command,
        Err(usage) => {
            eprintln!("{usage}");
            return ExitCode::from(2);
        }
    };

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            print_setup_instructions(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    let app = match App::connect(&config) {
        Ok(app) => app,
        Err(e) => {
            print_setup_instructions(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    let code = runtime::block_on(async {
        resume_session(&app).await;
        match command {
            Command::Feed => show_feed(&app).await,
            Command::Login(email) => login(&app, &email).await,
            Command::Logout => logout(&app).await,
        }
    });
    flush_notices(&app);
    code
}
