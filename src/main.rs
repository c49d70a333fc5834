//! gaud-console -- command-line operator console for the gaud gateway.
//!
//! Wires configuration, tracing, the console engine, its background cache
//! GC and the global 401 listener, then runs one command.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing_subscriber::EnvFilter;

use gaud_console::Console;
use gaud_console::api;
use gaud_console::config::Config;
use gaud_console::logs::{FilterPatch, Leg, LogEntry, format_timestamp};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Command {
    Logs { patch: FilterPatch, pages: usize },
    Correlate { request_id: String },
    Providers,
    Budgets,
}

struct CliArgs {
    config_path: PathBuf,
    command: Command,
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    eprintln!("Run with --help for usage information.");
    std::process::exit(1);
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> String {
    args.next()
        .unwrap_or_else(|| fail(&format!("{flag} requires a value")))
}

fn parse_time(value: &str, flag: &str) -> DateTime<Utc> {
    value
        .parse()
        .unwrap_or_else(|_| fail(&format!("{flag} expects an RFC 3339 timestamp")))
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> T {
    value
        .parse()
        .unwrap_or_else(|_| fail(&format!("{flag} expects a number")))
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from("gaud-console.toml");
    let mut command = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => config_path = PathBuf::from(next_value(&mut args, "--config")),
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("gaud-console {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "logs" => command = Some(parse_logs(&mut args)),
            "correlate" => {
                command = Some(Command::Correlate {
                    request_id: next_value(&mut args, "correlate"),
                })
            }
            "providers" => command = Some(Command::Providers),
            "budgets" => command = Some(Command::Budgets),
            other => fail(&format!("unknown argument: {other}")),
        }
    }

    CliArgs {
        config_path,
        command: command.unwrap_or_else(|| fail("no command given")),
    }
}

fn parse_logs(args: &mut impl Iterator<Item = String>) -> Command {
    let mut patch = FilterPatch::new();
    let mut keywords = gaud_console::logs::KeywordSet::new();
    let mut pages = 1usize;

    while let Some(arg) = args.next() {
        let flag = arg.as_str();
        match flag {
            "--app" => patch = patch.app(next_value(args, flag)),
            "--provider" => patch = patch.provider(next_value(args, flag)),
            "--level" => patch = patch.level(parse_number(&next_value(args, flag), flag)),
            "--status" => patch = patch.http_status(parse_number(&next_value(args, flag), flag)),
            "--begin" => patch = patch.begin(parse_time(&next_value(args, flag), flag)),
            "--end" => patch = patch.end(parse_time(&next_value(args, flag), flag)),
            "--keyword" | "-k" => {
                keywords.insert(&next_value(args, flag));
            }
            "--pages" => pages = parse_number::<usize>(&next_value(args, flag), flag).max(1),
            other => fail(&format!("unknown logs option: {other}")),
        }
    }

    if !keywords.is_empty() {
        patch = patch.keywords(keywords);
    }
    Command::Logs { patch, pages }
}

fn print_usage() {
    println!(
        "\
gaud-console {version} -- operator console for the gaud LLM gateway

USAGE:
    gaud-console [OPTIONS] <COMMAND>

COMMANDS:
    logs [FILTERS]           Page backward through the audit log
        --app <ID>               Only this application
        --provider <ID>          Only this provider
        --level <N>              Only this level
        --status <CODE>          Only this HTTP status
        --begin <RFC3339>        Lower time bound
        --end <RFC3339>          Upper time bound
        -k, --keyword <TERM>     Keyword term (repeatable)
        --pages <N>              Pages to load [default: 1]
    correlate <REQUEST_ID>   Show the caller/provider legs of one request
    providers                List providers
    budgets                  List budgets

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: gaud-console.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    GAUD_CONSOLE_CONFIG    Alternative to --config flag
    GAUD_CONSOLE_TOKEN     Bearer token (skips login)
    GAUD_CONSOLE_PASSWORD  Password for auth.username
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = parse_args();

    let config_path = std::env::var("GAUD_CONSOLE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    let config = Config::load(&config_path)?;
    init_tracing(&config);

    tracing::debug!(
        config = %config_path.display(),
        base_url = %config.server.base_url,
        timezone = %config.server.effective_timezone(),
        env_overrides = config.env_overrides.all().len(),
        "Configuration loaded"
    );

    let console = Console::new(config)?;
    let _gc = console.spawn_gc();
    let _expiry = console.spawn_expiry_listener();

    sign_in(&console).await?;

    match cli.command {
        Command::Logs { patch, pages } => run_logs(&console, patch, pages).await?,
        Command::Correlate { request_id } => run_correlate(&console, &request_id).await?,
        Command::Providers => {
            for p in api::providers::list(console.cache()).await? {
                let state = if p.enabled { "enabled" } else { "disabled" };
                println!("{:<24} {:<10} {:<8} {}", p.id, p.kind, state, p.name);
            }
        }
        Command::Budgets => {
            for b in api::budgets::list_all(console.cache()).await? {
                let owner = b.user_id.as_deref().or(b.app_id.as_deref()).unwrap_or("-");
                let limit = b
                    .monthly_limit
                    .map_or_else(|| "unlimited".to_string(), |l| format!("{l:.2}"));
                println!("{:<24} {:<20} {:>10.2} / {}", b.id, owner, b.monthly_used, limit);
            }
        }
    }

    let stats = console.cache().stats();
    tracing::debug!(
        hits = stats.hits,
        misses = stats.misses,
        dedups = stats.dedups,
        "Cache statistics"
    );
    Ok(())
}

/// Token from config wins; otherwise log in with username + password.
async fn sign_in(console: &Console) -> anyhow::Result<()> {
    if let Some(profile) = console.authenticate_from_config().await? {
        tracing::info!(user = %profile.name, "Signed in with configured token");
        return Ok(());
    }

    let username = console
        .config()
        .auth
        .username
        .clone()
        .context("Set auth.token or auth.username in the config")?;
    let password = std::env::var("GAUD_CONSOLE_PASSWORD")
        .context("GAUD_CONSOLE_PASSWORD is required to log in as auth.username")?;

    let profile = console.login(&username, &password).await?;
    tracing::info!(user = %profile.name, "Logged in");
    Ok(())
}

async fn run_logs(console: &Console, patch: FilterPatch, pages: usize) -> anyhow::Result<()> {
    let mut pager = console.logs();
    pager.set_filter(patch);

    pager.fetch_page().await?;
    for _ in 1..pages {
        if pager.is_exhausted() {
            break;
        }
        pager.load_more().await?;
    }

    if pager.is_gated() {
        eprintln!("(the log namespace is not granted to this account)");
    }
    for row in pager.rows() {
        print_row(row);
    }
    if !pager.is_exhausted() {
        eprintln!("-- more rows available; use --pages to load further");
    }
    Ok(())
}

fn print_row(row: &LogEntry) {
    println!(
        "{} {:>2} {:<36} {}",
        format_timestamp(row.timestamp),
        row.level,
        row.request_id.as_deref().unwrap_or("-"),
        row.message.as_deref().unwrap_or("")
    );
}

async fn run_correlate(console: &Console, request_id: &str) -> anyhow::Result<()> {
    let set = console.correlation().resolve(request_id).await?;
    if set.gated {
        eprintln!("(the log namespace is not granted to this account)");
    }

    for (leg, entry) in set.columns() {
        println!("== {} ==", leg.label());
        match entry {
            Some(entry) => print_leg(leg, entry)?,
            None => println!("(not recorded)"),
        }
    }
    Ok(())
}

fn print_leg(leg: Leg, entry: &LogEntry) -> anyhow::Result<()> {
    let payload = match leg.direction() {
        gaud_console::logs::Direction::Request => entry.raw_request.as_ref(),
        gaud_console::logs::Direction::Response => entry.raw_response.as_ref(),
    };
    println!("at {}", format_timestamp(entry.timestamp));
    match payload {
        Some(body) => println!("{}", serde_json::to_string_pretty(body)?),
        None => println!("{}", entry.message.as_deref().unwrap_or("")),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("gaud_console={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
