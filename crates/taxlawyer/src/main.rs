use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use taxlawyer::host::{build_assistant, parse_repl_line, ReplLine, TerminalEmitter};
use taxlawyer_core::auth::authorize;
use taxlawyer_core::commands::{commands, starters};
use taxlawyer_core::session::ThreadRecord;
use taxlawyer_core::{Command, Session, TurnEvent, TurnInput};
use taxlawyer_local::settings::{self, Settings};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "taxlawyer")]
#[command(about = "Uganda tax assistant with optional web grounding", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive chat on stdin/stdout.
    ///
    /// `web: <question>` searches before answering, `/search <question>` does the
    /// same, `/toggle` flips always-on grounding for this chat, `/quit` exits.
    Chat(ChatCmd),
    /// Answer one question and exit.
    Ask(AskCmd),
    /// Check a Google sign-in assertion against the login rules (json).
    Authorize(AuthorizeCmd),
    /// Diagnose configuration (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct ChatCmd {
    /// Persisted thread (json) to rebuild history from.
    #[arg(long)]
    resume: Option<std::path::PathBuf>,
    /// Identifier of the local user; decides which resumed steps are user turns.
    #[arg(long, env = "TAXLAWYER_USER", default_value = "local-user")]
    user: String,
    /// Override the completion model.
    #[arg(long)]
    model: Option<String>,
    /// Override the number of search results per grounded turn.
    #[arg(long)]
    count: Option<usize>,
}

#[derive(clap::Args, Debug)]
struct AskCmd {
    /// Question text. Prefix with `web:` to ground it.
    #[arg(required = true, trailing_var_arg = true)]
    question: Vec<String>,
    /// Search the web before answering (same as the WebSearch command).
    #[arg(long, action = clap::ArgAction::SetTrue)]
    search: bool,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    count: Option<usize>,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "text")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct AuthorizeCmd {
    /// Identity provider id from the login callback.
    #[arg(long, default_value = "google")]
    provider: String,
    /// Raw user claims (json object).
    #[arg(long)]
    claims: std::path::PathBuf,
    /// Identifier to use when the claims carry no email.
    #[arg(long, default_value = "")]
    default_identifier: String,
    /// Hosted-domain restriction.
    #[arg(long, env = "GOOGLE_ALLOWED_DOMAIN")]
    allowed_domain: Option<String>,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn print_chat_banner() {
    println!("Tax Lawyer (Uganda). Commands:");
    for c in commands() {
        let shortcut = match Command::from_id(c.id) {
            Some(Command::WebSearch) => "/search <question>",
            Some(Command::GroundToggle) => "/toggle",
            None => c.id,
        };
        println!("  {shortcut:<20} {}", c.description);
    }
    println!("  {:<20} {}", "web: <question>", "Search the web for this question");
    println!("  {:<20} {}", "/starters", "Show example questions");
    println!("  {:<20} {}", "/quit", "Leave");
}

fn print_starters() {
    println!("Try:");
    for s in starters() {
        println!("  {:<32} {}", s.label, s.message);
    }
}

async fn run_chat(args: ChatCmd) -> Result<()> {
    let settings = Settings::from_env()?;
    let assistant = build_assistant(&settings, args.model, args.count)?;

    let mut session = match &args.resume {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading thread {}", path.display()))?;
            let thread = ThreadRecord::from_json(&raw)?;
            let s = Session::resume(&thread, &args.user);
            println!("↩️ Resumed previous conversation.");
            s
        }
        None => Session::new(),
    };

    tracing::info!(user = %args.user, "{} has started the conversation", args.user);
    print_chat_banner();
    print_starters();

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_repl_line(&line) {
            ReplLine::Empty => continue,
            ReplLine::Quit => break,
            ReplLine::Starters => print_starters(),
            ReplLine::Turn(input) => {
                let mut emitter = TerminalEmitter::new(std::io::stdout());
                if let Err(e) = assistant.handle_turn(&mut session, input, &mut emitter).await {
                    tracing::error!(error = %e, "turn failed");
                    println!("\n⚠️ That answer failed: {e}");
                }
            }
        }
    }
    Ok(())
}

async fn run_ask(args: AskCmd) -> Result<()> {
    let settings = Settings::from_env()?;
    let assistant = build_assistant(&settings, args.model, args.count)?;
    let question = args.question.join(" ");
    let input = if args.search {
        TurnInput::command(Command::WebSearch, question)
    } else {
        TurnInput::text(question)
    };
    let mut session = Session::new();

    match args.output.to_ascii_lowercase().as_str() {
        "json" => {
            let mut events: Vec<TurnEvent> = Vec::new();
            let outcome = assistant.handle_turn(&mut session, input, &mut events).await?;
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "ask",
                "ok": true,
                "outcome": outcome,
                "events": events,
                "history_len": session.history().len(),
            });
            println!("{v}");
        }
        _ => {
            let mut emitter = TerminalEmitter::new(std::io::stdout());
            assistant.handle_turn(&mut session, input, &mut emitter).await?;
        }
    }
    Ok(())
}

fn run_authorize(args: AuthorizeCmd) -> Result<()> {
    let raw = std::fs::read_to_string(&args.claims)
        .with_context(|| format!("reading claims {}", args.claims.display()))?;
    let claims: serde_json::Value = serde_json::from_str(&raw)?;
    let Some(claims) = claims.as_object() else {
        anyhow::bail!("claims must be a json object");
    };
    let user = authorize(
        &args.provider,
        claims,
        &args.default_identifier,
        args.allowed_domain.as_deref(),
    );
    let v = serde_json::json!({
        "schema_version": 1,
        "kind": "authorize",
        "ok": user.is_some(),
        "user": user,
    });
    println!("{v}");
    Ok(())
}

fn run_doctor(args: DoctorCmd) {
    let creds = settings::credential_status();
    let ok = creds.gemini_configured && creds.brave_configured;
    let mut hints: Vec<String> = Vec::new();
    if !creds.gemini_configured {
        hints.push(format!("Set {}.", settings::GEMINI_KEY_VARS.join(" or ")));
    }
    if !creds.brave_configured {
        hints.push(format!("Set {}.", settings::BRAVE_KEY_VARS.join(" or ")));
    }
    let v = serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": ok,
        "name": "taxlawyer",
        "version": env!("CARGO_PKG_VERSION"),
        "credentials": creds,
        "hints": hints,
    });
    match args.output.to_ascii_lowercase().as_str() {
        "text" => {
            println!("ok: {ok}");
            println!("gemini key: {}", creds.gemini_configured);
            println!("brave key: {}", creds.brave_configured);
            println!("allowed domain: {}", creds.allowed_domain_configured);
            for h in hints {
                println!("hint: {h}");
            }
        }
        _ => println!("{v}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout is the transcript.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,taxlawyer=info")),
        )
        .init();

    // Before parsing, so clap `env` attributes see file-provided values.
    if let Some(path) = settings::load_env_file()? {
        tracing::debug!(path = %path.display(), "loaded env file");
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Chat(args) => run_chat(args).await?,
        Commands::Ask(args) => run_ask(args).await?,
        Commands::Authorize(args) => run_authorize(args)?,
        Commands::Doctor(args) => run_doctor(args),
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "taxlawyer",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("taxlawyer {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{v}"),
            }
        }
    }
    Ok(())
}
