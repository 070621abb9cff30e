//! Wiretap CLI
//!
//! Command-line front end for the Wiretap HTTP transcript logger.
//! `wiretap get` sends one request through a logged client; `wiretap proxy`
//! runs a reverse proxy that logs the traffic it receives.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use wiretap_core::{Config, Flusher, FormatterKind, Logger};

mod fetch;
mod proxy;

/// Wiretap - readable transcripts of HTTP traffic
#[derive(Parser, Debug)]
#[command(name = "wiretap")]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON configuration file (default: <config dir>/wiretap/config.json)
    #[arg(long, global = true, env = "WIRETAP_CONFIG")]
    config: Option<String>,

    /// Print every section: headers, bodies, TLS and timing
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    output: OutputArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Default)]
struct OutputArgs {
    /// Print when each request began and how long it took
    #[arg(long, global = true)]
    time: bool,

    /// Print TLS connection details and certificates
    #[arg(long, global = true)]
    tls: bool,

    /// Print request headers
    #[arg(long, global = true)]
    request_header: bool,

    /// Print request bodies
    #[arg(long, global = true)]
    request_body: bool,

    /// Print response headers
    #[arg(long, global = true)]
    response_header: bool,

    /// Print response bodies
    #[arg(long, global = true)]
    response_body: bool,

    /// Do not print the request URL and remote address
    #[arg(long, global = true)]
    skip_request_info: bool,

    /// Print credentials (Authorization, Cookie, ...) verbatim
    #[arg(long, global = true)]
    skip_sanitize: bool,

    /// Colorize the transcript
    #[arg(long, global = true)]
    colors: bool,

    /// Largest request body printed, in bytes
    #[arg(long, global = true)]
    max_request_body: Option<u64>,

    /// Largest response body printed, in bytes
    #[arg(long, global = true)]
    max_response_body: Option<u64>,

    /// Header never printed (repeatable)
    #[arg(long = "skip-header", global = true, value_name = "NAME")]
    skip_headers: Vec<String>,

    /// When the transcript is written out
    #[arg(long, global = true, value_enum)]
    flusher: Option<FlushMode>,

    /// Pretty-print JSON bodies
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FlushMode {
    NoBuffer,
    OnReady,
    OnEnd,
}

impl From<FlushMode> for Flusher {
    fn from(mode: FlushMode) -> Self {
        match mode {
            FlushMode::NoBuffer => Flusher::NoBuffer,
            FlushMode::OnReady => Flusher::OnReady,
            FlushMode::OnEnd => Flusher::OnEnd,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one request and print its transcript
    Get {
        /// Target URL
        url: String,

        /// Request method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request header as "Name: value" (repeatable)
        #[arg(short = 'H', long = "header", value_name = "HEADER")]
        headers: Vec<String>,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        /// Do not verify the server certificate
        #[arg(short = 'k', long)]
        insecure: bool,

        /// PEM file holding the client certificate and key
        #[arg(long)]
        cert: Option<PathBuf>,
    },

    /// Reverse proxy logging every request it forwards
    Proxy {
        /// Upstream base URL (e.g. http://localhost:3000)
        #[arg(short, long)]
        upstream: String,

        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

/// Default configuration file, if the platform has a config directory
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("wiretap").join("config.json"))
}

/// Resolve the configuration: file first, then command-line flags
fn load_config(args: &Args) -> wiretap_core::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let path = shellexpand::tilde(path);
            Config::load(&*path)?
        }
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "using default config file");
                Config::load(path)?
            }
            None => Config::default(),
        },
    };

    if args.verbose {
        config = config.with_all_sections();
    }

    let out = &args.output;
    config.time |= out.time;
    config.tls |= out.tls;
    config.request_header |= out.request_header;
    config.request_body |= out.request_body;
    config.response_header |= out.response_header;
    config.response_body |= out.response_body;
    config.skip_request_info |= out.skip_request_info;
    config.skip_sanitize |= out.skip_sanitize;
    config.colors |= out.colors;

    if let Some(max) = out.max_request_body {
        config.max_request_body = max;
    }
    if let Some(max) = out.max_response_body {
        config.max_response_body = max;
    }
    config.skip_headers.extend(out.skip_headers.iter().cloned());
    if let Some(mode) = out.flusher {
        config.flusher = mode.into();
    }
    if out.json && !config.formatters.contains(&FormatterKind::Json) {
        config.formatters.push(FormatterKind::Json);
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Diagnostics go to stderr; stdout carries the transcript
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let logger = Logger::new(config);

    let result = match args.command {
        Command::Get {
            url,
            method,
            headers,
            data,
            insecure,
            cert,
        } => {
            let request = fetch::FetchRequest {
                url,
                method,
                headers,
                data,
                insecure,
                cert,
            };
            fetch::run(&logger, request).await
        }
        Command::Proxy { upstream, port } => proxy::run_http_proxy(logger, upstream, port).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
