//! CodePen Sandbox CLI
//!
//! Build mode (print or save the synthesized document):
//!   codepen-sandbox build --html index.html --css style.css --js app.js [-o DIR]
//!
//! Run mode (execute headlessly, print the console panel):
//!   codepen-sandbox run --html index.html --js app.js
//!
//! Server mode (persistent process, reads requests from stdin):
//!   codepen-sandbox serve
//!
//! Protocol (server mode):
//!   Request (stdin, one JSON object per line):
//!     {"op":"run","html":"<h1>Hi</h1>","css":"","js":"console.log(1)","resources":[]}
//!     {"op":"stop"}
//!     {"op":"download"}
//!
//!   Response (stdout):
//!     Status:Ok
//!     Length:1234
//!
//!     {"state":"running","generation":1,"console":{...}}
//!
//!   Error response:
//!     Status:Error
//!     Length:42
//!
//!     Invalid request JSON: expected value at...

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use codepen_sandbox::{
    synthesize, ConsoleState, Draft, EditorSession, Generation, HeadlessFrame, HostContext,
    LifecycleState, LogLevel, SandboxConfig, SourceBundle,
};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "codepen-sandbox",
    version,
    about = "Synthesize and run HTML/CSS/JS pens in a sandbox"
)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the synthesized document, or save it as pen.html.
    Build {
        #[command(flatten)]
        pen: PenArgs,

        /// Directory to save pen.html into (default: print to stdout).
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Run the pen headlessly and print its console output.
    Run {
        #[command(flatten)]
        pen: PenArgs,
    },

    /// Persistent mode: one JSON request per line on stdin.
    Serve,
}

#[derive(Args)]
struct PenArgs {
    /// HTML fragment file
    #[arg(long)]
    html: Option<PathBuf>,

    /// CSS file
    #[arg(long)]
    css: Option<PathBuf>,

    /// JavaScript file
    #[arg(long)]
    js: Option<PathBuf>,

    /// Saved draft ({html, css, js, updated}); --html/--css/--js override it
    #[arg(long)]
    draft: Option<PathBuf>,

    /// External stylesheet or script URL (repeatable, kept in order)
    #[arg(long = "resource", value_name = "URL")]
    resources: Vec<String>,
}

impl PenArgs {
    fn load(&self) -> Result<SourceBundle> {
        let mut bundle = match &self.draft {
            Some(path) => {
                let text = read(path)?;
                let draft: Draft = serde_json::from_str(&text)
                    .map_err(|e| anyhow!("Invalid draft JSON in '{}': {}", path.display(), e))?;
                SourceBundle::from(draft)
            }
            None => SourceBundle::default(),
        };

        if let Some(path) = &self.html {
            bundle.markup = read(path)?;
        }
        if let Some(path) = &self.css {
            bundle.styles = read(path)?;
        }
        if let Some(path) = &self.js {
            bundle.script = read(path)?;
        }
        bundle.external_resources = self.resources.clone();
        Ok(bundle)
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read '{}'", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<SandboxConfig> {
    match path {
        Some(path) => Ok(SandboxConfig::from_file(path)?),
        None => Ok(SandboxConfig::default()),
    }
}

/// Build mode: synthesize only, nothing is executed
fn run_build(pen: &PenArgs, out_dir: Option<&Path>) -> Result<()> {
    let document = synthesize(&pen.load()?);

    match out_dir {
        Some(dir) => {
            let path = dir.join(codepen_sandbox::DOWNLOAD_FILE_NAME);
            std::fs::write(&path, document)
                .with_context(|| format!("Failed to write '{}'", path.display()))?;
            eprintln!("[codepen-sandbox] Saved {}", path.display());
        }
        None => println!("{}", document),
    }
    Ok(())
}

/// Run the current sources once and deliver everything the sandbox posted
async fn run_pen(session: &EditorSession<HeadlessFrame>, host: &HostContext) -> Result<Generation> {
    // No controller borrow may be held across the await below
    let (generation, execution) = {
        let mut controller = session.controller().borrow_mut();
        let generation = controller.run()?;
        (generation, controller.frame_mut().take_execution())
    };

    if let Some(execution) = execution {
        let loaded = execution.run().await?;
        for message in &loaded.messages {
            host.post_message(message);
        }
        session.controller().borrow_mut().on_load(loaded.generation);
    }
    Ok(generation)
}

fn print_console(console: &ConsoleState) {
    for entry in console.entries() {
        let tag = match entry.level {
            LogLevel::Log => "LOG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        eprintln!("[{}] {}", tag, entry.text);
    }
    if let Some(error) = console.runtime_error() {
        eprintln!("Runtime Error: {}", error);
    }
}

/// Run mode (single shot)
async fn run_single_shot(pen: &PenArgs, config: &SandboxConfig) -> Result<()> {
    let host = HostContext::new();
    let session = EditorSession::mount(&host, HeadlessFrame::new(config)?, config);
    session
        .controller()
        .borrow_mut()
        .update_sources(pen.load()?);

    run_pen(&session, &host).await?;

    print_console(&session.controller().borrow().console().borrow());
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request {
    Run(SourceBundle),
    Stop,
    Download,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    state: LifecycleState,
    generation: Generation,
    console: &'a ConsoleState,
}

/// Server mode (persistent process, reads requests from stdin)
async fn run_server(config: &SandboxConfig) -> Result<()> {
    let host = HostContext::new();
    let session = EditorSession::mount(&host, HeadlessFrame::new(config)?, config);

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut reader = stdin.lock();

    // Signal ready
    eprintln!("[codepen-sandbox] Server ready, reading from stdin...");

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            // EOF - stdin closed, exit gracefully
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                write_response(&mut stdout, false, &format!("Invalid request JSON: {}", e))?;
                continue;
            }
        };
        tracing::debug!(?request, "server request");

        let body = match request {
            Request::Run(bundle) => {
                session.controller().borrow_mut().update_sources(bundle);
                match run_pen(&session, &host).await {
                    Ok(_) => snapshot(&session)?,
                    Err(e) => {
                        write_response(&mut stdout, false, &e.to_string())?;
                        continue;
                    }
                }
            }
            Request::Stop => {
                session.controller().borrow_mut().stop();
                snapshot(&session)?
            }
            Request::Download => match session.controller().borrow().download() {
                Some(download) => download.content,
                None => {
                    write_response(&mut stdout, false, "Nothing to download: run the pen first")?;
                    continue;
                }
            },
        };
        write_response(&mut stdout, true, &body)?;
    }

    eprintln!("[codepen-sandbox] Server shutting down");
    Ok(())
}

fn snapshot(session: &EditorSession<HeadlessFrame>) -> Result<String> {
    let controller = session.controller().borrow();
    let console = controller.console().borrow();
    let snapshot = Snapshot {
        state: controller.state(),
        generation: controller.generation(),
        console: &console,
    };
    Ok(serde_json::to_string(&snapshot)?)
}

/// Write response in length-prefixed protocol
fn write_response(stdout: &mut std::io::Stdout, ok: bool, body: &str) -> Result<()> {
    let status = if ok { "Ok" } else { "Error" };
    let length = body.len();

    writeln!(stdout, "Status:{}", status)?;
    writeln!(stdout, "Length:{}", length)?;
    writeln!(stdout)?; // Empty line separator
    write!(stdout, "{}", body)?;
    stdout.flush()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Build { pen, out_dir } => run_build(&pen, out_dir.as_deref()),
        Command::Run { pen } => run_single_shot(&pen, &config).await,
        Command::Serve => run_server(&config).await,
    }
}
