use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stepwise::control::{
    command_queue, spawn_keyboard_reader, spawn_narrator, spawn_voice_loop, CommandRecognizer,
    CommandSpeaker, ControlHandle, FunctionContextExtractor, LiveView, Speaker,
};
use stepwise::controller::{ManualTrigger, Mode};
use stepwise::dap::{self, LaunchTarget};
use stepwise::query::QueryService;
use stepwise::web::{run_server, WebAppState};
use stepwise::{
    util, Config, Database, EndReason, GitCli, SessionContext, SessionStore, SourceControl,
    SourceResolver, SteppingController,
};
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "stepwise", version, about = "Step through a script and record every line")]
struct Cli {
    /// Directory holding the database, logs and config.toml
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Database file (overrides config.toml)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Debug a script, recording one report per executed line
    Run {
        script: PathBuf,
        /// Arguments passed to the script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Start paused and wait for a command before every step
        #[arg(long, conflicts_with = "manual_from")]
        manual: bool,
        /// Step automatically until FILE:LINE is reached, then pause
        #[arg(long, value_name = "FILE:LINE")]
        manual_from: Option<ManualTrigger>,
        /// Delay between automatic steps
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Do not start the query server
        #[arg(long)]
        no_web: bool,
        #[arg(long)]
        port: Option<u16>,
        /// Speak each step with the configured speech command
        #[arg(long)]
        narrate: bool,
    },
    /// Serve the query API over recorded sessions
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// List recorded sessions
    Sessions,
    /// Write a session and all of its line reports as JSON
    Export {
        session_id: String,
        /// Output file; stdout when omitted
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(util::default_data_dir);
    init_logging(&data_dir)?;

    let mut config = Config::load(&data_dir);
    if let Some(db) = cli.db.clone() {
        config = config.with_db_path(db);
    }

    match cli.command {
        Commands::Run {
            script,
            args,
            manual,
            manual_from,
            delay_ms,
            no_web,
            port,
            narrate,
        } => {
            if manual {
                config.stepping.start_mode = Mode::Manual;
            }
            if let Some(delay_ms) = delay_ms {
                config.stepping.pacing = Duration::from_millis(delay_ms);
            }
            if let Some(port) = port {
                config.web.port = port;
            }
            let options = RunOptions {
                script,
                args,
                manual_from,
                web: !no_web,
                narrate,
            };
            let code = run_session(config, options).await?;
            // The stdin reader would otherwise hold the runtime open
            std::process::exit(code);
        }
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.web.host = host;
            }
            if let Some(port) = port {
                config.web.port = port;
            }
            let query = open_query(&config)?;
            println!(
                "Serving {} at http://{}:{}/api",
                config.db_path.display(),
                config.web.host,
                config.web.port
            );
            run_server(WebAppState::new(query), config.web.clone()).await
        }
        Commands::Sessions => {
            let query = open_query(&config)?;
            let sessions = query.list_sessions()?;
            if sessions.is_empty() {
                println!("No sessions recorded in {}", config.db_path.display());
                return Ok(());
            }
            for session in sessions {
                let state = if session.is_closed() { "closed" } else { "open" };
                println!(
                    "{}  {}  {}  lines={} errors={} crashes={}  {}",
                    session.session_id,
                    session.start_time.format("%Y-%m-%d %H:%M:%S"),
                    state,
                    session.total_lines,
                    session.errors,
                    session.crashes,
                    session.file.display()
                );
            }
            Ok(())
        }
        Commands::Export { session_id, output } => {
            let query = open_query(&config)?;
            let export = query.export_session(&session_id)?;
            let json = serde_json::to_string_pretty(&export)?;
            match output {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!(
                        "Exported {} line reports to {}",
                        export.line_reports.len(),
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
            Ok(())
        }
    }
}

/// Log to `<data_dir>/logs/stepwise.log`; stdout belongs to the operator
fn init_logging(data_dir: &std::path::Path) -> Result<()> {
    fs::create_dir_all(util::logs_dir(data_dir))?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path(data_dir))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .init();
    Ok(())
}

fn open_query(config: &Config) -> Result<QueryService> {
    let db = Database::open(config.db_path.clone())
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    let store = SessionStore::new(db.connection());
    let resolver = SourceResolver::new(store.clone(), Arc::new(GitCli::new()));
    Ok(QueryService::new(store, resolver, config.query))
}

struct RunOptions {
    script: PathBuf,
    args: Vec<String>,
    manual_from: Option<ManualTrigger>,
    web: bool,
    narrate: bool,
}

async fn run_session(config: Config, options: RunOptions) -> Result<i32> {
    let script = fs::canonicalize(&options.script)
        .with_context(|| format!("Script not found: {}", options.script.display()))?;

    let db = Database::open(config.db_path.clone())
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    let store = SessionStore::new(db.connection());
    let vcs: Arc<dyn SourceControl> = Arc::new(GitCli::new());
    let resolver = SourceResolver::new(store.clone(), Arc::clone(&vcs));
    let session = SessionContext::new(script.clone(), vcs.provenance(&script));

    let mut settings = config.controller_settings();
    settings.manual_from = options.manual_from;
    let mode_label = match &settings.manual_from {
        Some(trigger) => format!("auto until {trigger}"),
        None => settings.start_mode.to_string(),
    };

    let target = LaunchTarget::new(script.clone()).with_args(options.args);
    let link = dap::launch(&config.adapter, &target)
        .await
        .context("Failed to start the debug adapter")?;

    let (sender, receiver) = command_queue();
    let extractor = FunctionContextExtractor::new();
    let controller = SteppingController::new(
        link,
        store.clone(),
        resolver.clone(),
        receiver,
        session.clone(),
        settings,
    )
    .with_extractor(extractor.clone());
    let live = controller.live_state().subscribe();

    spawn_keyboard_reader(&sender);
    spawn_console(live.clone());

    if let Some(command) = config.voice.recognize_command.as_deref() {
        match CommandRecognizer::spawn(command) {
            Ok(recognizer) => {
                spawn_voice_loop(Box::new(recognizer), &sender)?;
            }
            Err(e) => tracing::warn!(error = %e, "Voice recognition unavailable"),
        }
    }

    if options.narrate {
        match config.voice.speak_command.as_deref().and_then(CommandSpeaker::from_command) {
            Some(speaker) => {
                let speaker: Arc<dyn Speaker> = Arc::new(speaker);
                spawn_narrator(speaker, live.clone());
            }
            None => eprintln!("--narrate needs [voice] speak_command in config.toml"),
        }
    }

    if options.web {
        let handle = ControlHandle {
            sender: sender.clone(),
            live: live.clone(),
            extractor,
            resolver: resolver.clone(),
            session: session.clone(),
        };
        let state = WebAppState::new(QueryService::new(store, resolver, config.query))
            .with_control(handle);
        let web = config.web.clone();
        eprintln!("Query API at http://{}:{}/api", web.host, web.port);
        tokio::spawn(async move {
            if let Err(e) = run_server(state, web).await {
                tracing::error!(error = %e, "Query server stopped");
            }
        });
    }

    eprintln!(
        "Session {} ({} mode). Commands: s(tep), a(uto), c(ontinue), p(ause), q(uit), note <text>",
        session.id, mode_label
    );

    let outcome = controller.run().await?;
    eprintln!(
        "Session {} ended: {} ({} lines recorded)",
        outcome.session_id, outcome.reason, outcome.lines_recorded
    );

    Ok(match outcome.reason {
        EndReason::LinkLost { .. } | EndReason::StoreFailed { .. } => 1,
        _ => 0,
    })
}

/// Echo each recorded step to stderr
fn spawn_console(mut rx: watch::Receiver<LiveView>) {
    tokio::spawn(async move {
        let mut last: Option<i64> = None;
        loop {
            let view = rx.borrow_and_update().clone();
            if view.latest_report_id != last {
                if let Some(text) = view.narration() {
                    eprintln!("  {text}");
                }
                last = view.latest_report_id;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    });
}
