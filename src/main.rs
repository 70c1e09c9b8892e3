//! pdfshield command-line interface
//!
//! Session management and document inspection against the protected document
//! backend. Document bytes are never written to disk.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Arg, ArgMatches, Command, ValueEnum};
use pdfshield::render::PdfRenderer;
use pdfshield::{AppContext, Config, Error, JsonFileStore, KeyValueStore, LopdfRenderer, Result};
use tracing::{error, info};

const DEFAULT_STORE: &str = "pdfshield-store.json";

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Info, warning, and error messages (default)
    Info,
    /// Debug and all messages
    Debug,
    /// Trace and all messages (most verbose)
    Trace,
}

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let log_level = matches
        .get_one::<LogLevel>("verbose")
        .unwrap_or(&LogLevel::Info);
    init_logging(log_level);

    if let Err(e) = run(&matches).await {
        error!("❌ {} [{}]", e, e.code());
        process::exit(1);
    }
}

async fn run(matches: &ArgMatches) -> Result<()> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(url) = matches.get_one::<String>("api-url") {
        config.api.base_url = url.clone();
    }

    let store_path = matches
        .get_one::<String>("store")
        .cloned()
        .or_else(|| config.store_path.clone())
        .unwrap_or_else(|| DEFAULT_STORE.to_string());
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(PathBuf::from(&store_path))?);

    let ctx = AppContext::init(config, store)?;
    let api = Arc::new(ctx.http_api()?);
    let fetch = ctx.fetch(api.clone(), api);

    match matches.subcommand() {
        Some(("login", sub)) => {
            let username = sub
                .get_one::<String>("username")
                .ok_or_else(|| Error::ConfigError("username is required".into()))?;
            let password = match sub.get_one::<String>("password") {
                Some(p) => p.clone(),
                None => read_password()?,
            };
            fetch.login(username, &password).await?;
            println!("Logged in as {}", username);
        }
        Some(("logout", _)) => {
            fetch.logout().await?;
            println!("Logged out");
        }
        Some(("list", _)) => {
            for name in fetch.list_documents().await? {
                println!("{}", name);
            }
        }
        Some(("audit", sub)) => {
            let entries = ctx.audit().entries();
            if sub.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for e in entries {
                    println!(
                        "{} [{}] user={} file={} {}",
                        e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        e.kind,
                        e.identity,
                        e.filename.as_deref().unwrap_or("-"),
                        e.message
                    );
                }
            }
        }
        Some(("inspect", sub)) => {
            let filename = sub
                .get_one::<String>("filename")
                .ok_or_else(|| Error::ConfigError("filename is required".into()))?;
            inspect(&fetch, filename).await?;
        }
        _ => {
            build_cli().print_help()?;
        }
    }

    ctx.teardown()
}

async fn inspect(fetch: &pdfshield::AuthenticatedFetch, filename: &str) -> Result<()> {
    let bytes = fetch.fetch_document(filename).await?;
    info!("🔍 Inspecting {} ({} bytes)", filename, bytes.len());

    let document = LopdfRenderer::new()
        .parse(&bytes)
        .await
        .map_err(|e| Error::CorruptDocument(e.to_string()))?;

    println!("{}: {} pages", filename, document.page_count());
    for number in 1..=document.page_count() {
        let size = document.page(number).await?.intrinsic_size();
        println!("  page {:>4}: {:.1} x {:.1} pt", number, size.width, size.height);
    }
    Ok(())
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn build_cli() -> Command {
    Command::new("pdfshield")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Protected viewing sessions for sensitive PDF documents")
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .value_name("FILE")
            .global(true)
            .help("Configuration file (JSON/YAML)"))
        .arg(Arg::new("store")
            .long("store")
            .value_name("FILE")
            .global(true)
            .help("Session and security log store"))
        .arg(Arg::new("api-url")
            .long("api-url")
            .value_name("URL")
            .global(true)
            .help("Backend base URL, overriding the configuration"))
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .value_parser(clap::value_parser!(LogLevel))
            .default_value("info")
            .global(true)
            .help("Log verbosity"))
        .subcommand(Command::new("login")
            .about("Authenticate and store the session")
            .arg(Arg::new("username")
                .required(true)
                .help("Account name"))
            .arg(Arg::new("password")
                .short('p')
                .long("password")
                .value_name("PASSWORD")
                .help("Password; read from stdin when omitted")))
        .subcommand(Command::new("logout")
            .about("End the stored session"))
        .subcommand(Command::new("list")
            .about("List available documents"))
        .subcommand(Command::new("audit")
            .about("Show the local security log")
            .arg(Arg::new("json")
                .long("json")
                .action(clap::ArgAction::SetTrue)
                .help("Print entries as JSON")))
        .subcommand(Command::new("inspect")
            .about("Fetch a document and print its page geometry")
            .arg(Arg::new("filename")
                .required(true)
                .help("Document name as listed by the backend")))
}

fn init_logging(level: &LogLevel) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let filter_level = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!("pdfshield={}", filter_level)))
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}
