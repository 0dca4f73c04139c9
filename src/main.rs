// Defensive programming lints - prevent panics and unsafe patterns
#![deny(clippy::indexing_slicing)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::fallible_impl_from)]
#![warn(clippy::wildcard_enum_match_arm)]
#![warn(clippy::fn_params_excessive_bools)]
// Idiomatic Rust lints
#![warn(clippy::needless_return)]
#![warn(clippy::let_and_return)]
#![warn(clippy::must_use_candidate)]
#![warn(clippy::redundant_closure_for_method_calls)]
#![warn(clippy::map_unwrap_or)]
#![warn(clippy::explicit_iter_loop)]

use color_eyre::Result;
use lorekeeper::agents::OllamaClient;
use lorekeeper::app::App;
use lorekeeper::{ContextInjector, Query, RagflowClient, RetrievalBackend, Settings};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup error handling
    color_eyre::install()?;

    let config_path = Settings::config_path()?;
    let settings = Settings::load_from(&config_path)?;
    init_tracing(settings.debug_mode);

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        return handle_cli_args(&args, settings).await;
    }

    let agent = OllamaClient::new(&settings.chat)?;
    if !agent.is_available().await {
        eprintln!(
            "Ollama is not reachable at {}; replies will fail until it is running.",
            settings.chat.ollama_url
        );
    }
    if !settings.is_configured() {
        eprintln!("RAGFlow is not configured; set api_key and dataset_id in {}", config_path.display());
    }

    let injector = ContextInjector::with_ragflow(settings)?;
    let mut app = App::new(injector, agent).with_settings_path(config_path);
    run_app(&mut app).await
}

fn init_tracing(debug_mode: bool) {
    let default_level = if debug_mode {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn handle_cli_args(args: &[String], settings: Settings) -> Result<()> {
    let cmd = args
        .get(1)
        .ok_or_else(|| color_eyre::eyre::eyre!("No command provided"))?;
    let program_name = args.first().map_or("lorekeeper", String::as_str);

    match cmd.as_str() {
        "--help" | "-h" | "help" => print_help(program_name),
        "--version" | "-v" => println!("Lorekeeper v{}", env!("CARGO_PKG_VERSION")),
        "config" => {
            println!("# {}", Settings::config_path()?.display());
            let mut shown = settings;
            if !shown.api_key.is_empty() {
                shown.api_key = "********".to_string();
            }
            println!("{}", toml::to_string_pretty(&shown)?);
        }
        "search" => {
            let text = args.get(2..).map(|rest| rest.join(" ")).unwrap_or_default();
            let Some(query) = Query::parse(&text, 1) else {
                eprintln!("Usage: {} search <query>", program_name);
                std::process::exit(2);
            };
            let client = RagflowClient::new()?;
            match client.retrieve(&query, &settings).await {
                Ok(result) => {
                    for (index, chunk) in result.chunks().iter().enumerate() {
                        println!("[{}] ({:.3}) {}", index + 1, chunk.score, chunk.text);
                    }
                }
                Err(error) => {
                    eprintln!("Retrieval failed: {}", error);
                    std::process::exit(1);
                }
            }
        }
        cmd_str => {
            eprintln!("Unknown command: {}", cmd_str);
            eprintln!("Run with --help for available commands.");
            std::process::exit(1);
        }
    }
    Ok(())
}

fn print_help(program_name: &str) {
    println!("Lorekeeper - retrieval-augmented chat over a RAGFlow dataset");
    println!();
    println!("Usage: {} [command]", program_name);
    println!();
    println!("Commands:");
    println!("  search <query> - Print the chunks RAGFlow returns for a query");
    println!("  config         - Show the configuration file path and contents");
    println!("  --help         - Show this help");
    println!("  --version      - Show version");
    println!();
    println!("Run without arguments to start an interactive chat. Type /help there for commands.");
}

async fn run_app(app: &mut App) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Lorekeeper chat. Type /help for commands.");

    loop {
        print!("{}> ", app.current_conversation);
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        app.handle_input(&line).await?;
        for message in app.take_messages() {
            println!("{}", message);
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
