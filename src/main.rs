use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use http::Method;

use wiretap::output;
use wiretap::{
    har, CaptureSession, HttpClient, LiveRequestFactory, RecorderFactory, TransportConfig,
    TransportRegistry,
};

#[derive(Parser, Debug)]
#[command(name = "wiretap")]
#[command(author, version, about = "Record and replay HTTP exchanges", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output format
    #[arg(short, long, default_value = "pretty", global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, default_value = "false", global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a HAR file to a wiretap capture session
    Convert {
        /// Input HAR file
        #[arg(required = true)]
        input: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Print the exchanges of a capture session
    Inspect {
        /// Capture session file
        #[arg(required = true)]
        session: String,
    },

    /// Perform a live request and append the exchange to a session file
    Record {
        /// URL to request
        #[arg(required = true)]
        url: String,

        /// Capture session file, created if missing
        #[arg(short, long, required = true)]
        session: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request header (format: "Header-Name:value")
        #[arg(short = 'H', long)]
        header: Vec<String>,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        /// Request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Do not follow redirects
        #[arg(long, default_value = "false")]
        no_redirects: bool,
    },
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                }),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Convert { input, output } => convert(&input, output.as_deref()),
        Command::Inspect { session } => inspect(&session, &args.format),
        Command::Record {
            url,
            session,
            method,
            header,
            data,
            timeout,
            no_redirects,
        } => {
            let config = TransportConfig {
                timeout: Duration::from_secs(timeout),
                follow_redirects: !no_redirects,
                ..TransportConfig::default()
            };
            record(&url, &session, &method, &header, data, config).await
        }
    }
}

fn convert(input: &str, output: Option<&str>) -> Result<()> {
    let content =
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))?;
    let har = har::parse_har(&content).context("Invalid HAR file")?;
    let session = har::har_to_session(har)?;
    let document = session.to_document().with_source(input.to_string());

    match output {
        Some(path) => {
            wiretap::save_document(&document, path)?;
            tracing::info!("Wrote {} exchanges to {}", document.requests.len(), path);
        }
        None => println!("{}", output::render_document_json(&document)?),
    }
    Ok(())
}

fn inspect(path: &str, format: &OutputFormat) -> Result<()> {
    let document =
        wiretap::load_document(path).with_context(|| format!("Failed to load {}", path))?;

    match format {
        OutputFormat::Pretty => output::print_document_pretty(&document),
        OutputFormat::Json => println!("{}", output::render_document_json(&document)?),
        OutputFormat::Compact => println!("{}", output::render_document_compact(&document)),
    }
    Ok(())
}

async fn record(
    url: &str,
    path: &str,
    method: &str,
    headers: &[String],
    data: Option<String>,
    config: TransportConfig,
) -> Result<()> {
    let session = if Path::new(path).exists() {
        wiretap::load_session(path).with_context(|| format!("Failed to load {}", path))?
    } else {
        CaptureSession::new()
    };

    let live = Arc::new(LiveRequestFactory::new(config)?);
    let registry = Arc::new(TransportRegistry::with_live(live.clone()));
    let client = HttpClient::with_live(live.clone()).with_registry(Arc::clone(&registry));

    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let mut request = client.request(method, url);
    for header in headers {
        let Some((name, value)) = header.split_once(':') else {
            bail!("Invalid header (expected \"Name:value\"): {}", header);
        };
        request = request.header(name.trim(), value.trim());
    }
    if let Some(data) = data {
        request = request.body(data);
    }

    let result = {
        let _guard = registry.begin(Arc::new(RecorderFactory::with_live(session.clone(), live)))?;
        request.send().await
    };

    match result {
        Ok(response) => tracing::info!("{} {}", response.status(), response.url()),
        Err(err) => tracing::warn!("Request failed, recording the error: {}", err),
    }

    wiretap::save_session(&session, path)?;
    tracing::info!("Session now holds {} exchanges", session.len());
    Ok(())
}
