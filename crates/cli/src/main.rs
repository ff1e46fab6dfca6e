//! Terminal front end for the downpour engine.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use downpour::{
    ChunkSize, Download, DownloadEvent, DownloadOptions, ExistBehavior, HttpOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Parser, Debug)]
#[command(
    name = "downpour",
    version,
    about = "Resumable multi-connection HTTP downloader"
)]
struct Args {
    /// URL to download
    url: String,

    /// Destination file or directory
    #[arg(default_value = ".")]
    dest: PathBuf,

    /// Number of parallel connections
    #[arg(short, long, default_value_t = 5)]
    connections: usize,

    /// Fixed chunk size in bytes (default: a tenth of the file, capped at 10 MiB)
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Retries per chunk before giving up
    #[arg(long, default_value_t = 3)]
    max_retry: usize,

    /// Base delay between retries, in milliseconds
    #[arg(long, default_value_t = 2000)]
    retry_delay: u64,

    /// Extra delay added per failed attempt, in milliseconds
    #[arg(long, default_value_t = 3000)]
    retry_backoff: u64,

    /// Overwrite the destination if it already exists
    #[arg(long, conflicts_with = "ignore_existing")]
    overwrite: bool,

    /// Skip the download silently if the destination already exists
    #[arg(long)]
    ignore_existing: bool,

    /// Do not follow redirects
    #[arg(long)]
    no_redirect: bool,

    /// Extra request header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Print events as JSON lines instead of a progress bar
    #[arg(long)]
    json: bool,
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .with_context(|| format!("invalid header `{entry}`, expected `Name: value`"))?;
        let name: HeaderName = name
            .trim()
            .parse()
            .with_context(|| format!("invalid header name in `{entry}`"))?;
        let value: HeaderValue = value
            .trim()
            .parse()
            .with_context(|| format!("invalid header value in `{entry}`"))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn build_options(args: &Args) -> Result<DownloadOptions> {
    let exist_behavior = if args.overwrite {
        ExistBehavior::Overwrite
    } else if args.ignore_existing {
        ExistBehavior::Ignore
    } else {
        ExistBehavior::NewFile
    };
    let mut options = DownloadOptions {
        connections: args.connections.max(1),
        exist_behavior,
        follow_redirect: !args.no_redirect,
        http: HttpOptions {
            headers: parse_headers(&args.headers)?,
            timeout: args.timeout.map(Duration::from_secs),
            ..HttpOptions::default()
        },
        max_retry: args.max_retry,
        retry_delay: Duration::from_millis(args.retry_delay),
        retry_backoff: Duration::from_millis(args.retry_backoff),
        ..DownloadOptions::default()
    };
    if let Some(bytes) = args.chunk_size {
        options.chunk_size = ChunkSize::Fixed(bytes);
    }
    Ok(options)
}

/// Renders the event stream as a progress bar until the session closes.
async fn run_with_bar(mut events: UnboundedReceiver<DownloadEvent>) -> Result<bool> {
    let mut bar: Option<ProgressBar> = None;
    let mut saved_path = None;
    let mut ended = false;
    let mut failure = None;

    while let Some(event) = events.recv().await {
        match event {
            DownloadEvent::Metadata(metadata) => {
                saved_path = Some(metadata.saved_file_path.clone());
                let progress = match metadata.size {
                    Some(size) => {
                        let progress = ProgressBar::new(size);
                        progress.set_style(
                            ProgressStyle::default_bar()
                                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}")
                                .unwrap()
                                .progress_chars("#>-"),
                        );
                        progress
                    }
                    None => ProgressBar::new_spinner(),
                };
                if metadata.is_resume {
                    progress.set_message("resuming");
                }
                bar = Some(progress);
            }
            DownloadEvent::Progress(report) => {
                if let Some(bar) = &bar {
                    bar.set_position(report.total.bytes);
                }
            }
            DownloadEvent::Retry {
                chunk_id,
                attempt,
                error,
            } => {
                eprintln!("retrying chunk #{chunk_id} (attempt {attempt}): {error}");
            }
            DownloadEvent::Build { percentage } => {
                if let Some(bar) = &bar {
                    bar.set_message(format!("assembling {percentage:.0}%"));
                }
            }
            DownloadEvent::End => ended = true,
            DownloadEvent::Error(error) => failure = Some(error),
            DownloadEvent::Close => break,
        }
    }

    if let Some(bar) = &bar {
        if ended {
            bar.finish_with_message("done");
        } else {
            bar.abandon();
        }
    }
    if let Some(error) = failure {
        bail!(error);
    }
    match (ended, saved_path) {
        (true, Some(path)) => println!("saved to {path}"),
        (true, None) => {}
        (false, _) => println!("nothing to do"),
    }
    Ok(ended)
}

/// Prints every event as one JSON object per line.
async fn run_with_json(mut events: UnboundedReceiver<DownloadEvent>) -> Result<bool> {
    let mut ended = false;
    let mut failure = None;
    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        match event {
            DownloadEvent::End => ended = true,
            DownloadEvent::Error(error) => failure = Some(error),
            DownloadEvent::Close => break,
            _ => {}
        }
    }
    if let Some(error) = failure {
        bail!(error);
    }
    Ok(ended)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let options = build_options(&args)?;
    let download = Download::new(args.url.clone(), args.dest.clone(), options);
    let events = download.subscribe();
    download.start();

    if args.json {
        run_with_json(events).await?;
    } else {
        run_with_bar(events).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&[
            "Authorization: Bearer token".to_string(),
            "X-Custom: a:b".to_string(),
        ])
        .unwrap();
        assert_eq!(headers["authorization"], "Bearer token");
        assert_eq!(headers["x-custom"], "a:b");
    }

    #[test]
    fn test_parse_headers_rejects_missing_colon() {
        assert!(parse_headers(&["not-a-header".to_string()]).is_err());
    }

    #[test]
    fn test_build_options_maps_flags() {
        let args = Args::parse_from([
            "downpour",
            "https://example.com/f.bin",
            "/tmp/f.bin",
            "--connections",
            "8",
            "--chunk-size",
            "65536",
            "--overwrite",
            "--no-redirect",
        ]);
        let options = build_options(&args).unwrap();
        assert_eq!(options.connections, 8);
        assert_eq!(options.exist_behavior, ExistBehavior::Overwrite);
        assert!(!options.follow_redirect);
        assert_eq!(options.chunk_size.resolve(0), 65536);
    }
}
