//! upload-destination - store one upload and print its finalize fields
//!
//! Reads a pre-authorization response, streams a file (or stdin) to the
//! destination it describes, and prints the signed finalize fields as JSON.

use anyhow::Context;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::info;
use upload_destination::destination::preparer::{AuthorizeResponse, UploadPreparer};
use upload_destination::destination::{self, UNKNOWN_SIZE};
use upload_destination::secret::TokenSigner;
use upload_destination::{logging, metrics, Config, FileHandler};

/// Time given to cleanup tasks after the upload scope ends
const CLEANUP_GRACE: Duration = Duration::from_millis(200);

/// Store one upload the way the proxy would
#[derive(Parser, Debug)]
#[command(name = "upload-destination")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Pre-authorization response (JSON)
    #[arg(short, long)]
    authorize: PathBuf,

    /// File to upload; stdin when omitted
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Declared size in bytes; defaults to the file size, or unknown for stdin
    #[arg(short, long)]
    size: Option<i64>,

    /// Form field name used as prefix for the finalize fields
    #[arg(long)]
    field: Option<String>,

    /// Keep temp files until Ctrl-C
    #[arg(long)]
    hold: bool,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long)]
    print_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("loading configuration from {:?}", args.config))?;
    logging::init_subscriber(&config.logging)?;

    info!("Starting upload-destination v{}", env!("CARGO_PKG_VERSION"));

    let signer = config.token_signer()?;
    let response: AuthorizeResponse = serde_json::from_slice(
        &std::fs::read(&args.authorize)
            .with_context(|| format!("reading {:?}", args.authorize))?,
    )
    .context("parsing authorization response")?;

    let prefix = args
        .field
        .clone()
        .unwrap_or_else(|| config.upload.temp_file_prefix.clone());
    let opts = UploadPreparer::new(config.object_storage.clone())
        .with_default_timeout(config.upload.default_timeout())
        .prepare(&response, &prefix)?;

    let (reader, size): (Box<dyn AsyncRead + Send + Unpin>, i64) = match &args.file {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {:?}", path))?;
            let len = file.metadata().await?.len() as i64;
            (Box::new(file), args.size.unwrap_or(len))
        }
        None => (
            Box::new(tokio::io::stdin()),
            args.size.unwrap_or(UNKNOWN_SIZE),
        ),
    };

    let scope = CancellationToken::new();
    let result = destination::upload(&scope, reader, size, &opts).await;

    let outcome = match result {
        Ok(fh) => report(&fh, &args, &signer).await,
        Err(e) => Err(anyhow::Error::new(e).context("upload failed")),
    };

    scope.cancel();
    tokio::time::sleep(CLEANUP_GRACE).await;

    if args.print_metrics {
        eprintln!("{}", metrics::render());
    }

    outcome
}

/// Print the finalize fields, then hold the temp files if asked to
async fn report(fh: &FileHandler, args: &Args, signer: &TokenSigner) -> anyhow::Result<()> {
    let fields: BTreeMap<_, _> = fh
        .finalize_fields(args.field.as_deref(), signer)
        .context("building finalize fields")?
        .into_iter()
        .collect();
    println!("{}", serde_json::to_string_pretty(&fields)?);

    if args.hold {
        info!("Holding temp files until Ctrl-C");
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
