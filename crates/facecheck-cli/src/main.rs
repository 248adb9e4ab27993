use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecheck_core::{build_verifier, FetchConfig, ImageFetcher, Verdict, VerifierConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facecheck", about = "Fetch images and compare faces without the web front-end")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one image reference and write the normalized JPEG
    Fetch {
        /// http(s) URL or data: URI
        source: String,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Compare the faces in two image references using the configured verifier
    Verify {
        /// First image: http(s) URL or data: URI
        source1: String,
        /// Second image: http(s) URL or data: URI
        source2: String,
        /// Print a JSON object instead of the result line
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let fetcher = ImageFetcher::new(FetchConfig::from_env())?;

    match cli.command {
        Commands::Fetch { source, output } => match fetcher.fetch(&source).await {
            Ok(image) => {
                std::fs::write(&output, image.as_bytes())
                    .with_context(|| format!("cannot write {}", output.display()))?;
                println!(
                    "{}: {}x{} JPEG, {} bytes",
                    output.display(),
                    image.width(),
                    image.height(),
                    image.as_bytes().len()
                );
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                tracing::warn!(%source, reason = e.reason(), error = %e, "image fetch failed");
                Ok(ExitCode::FAILURE)
            }
        },
        Commands::Verify {
            source1,
            source2,
            json,
        } => {
            let config = VerifierConfig::from_env()?;
            let mut verifier = build_verifier(&config).context("verifier initialization failed")?;

            let first = fetcher.fetch(&source1).await;
            let second = fetcher.fetch(&source2).await;

            let (first, second) = match (first, second) {
                (Ok(a), Ok(b)) => (a, b),
                (a, b) => {
                    let errors: Vec<String> = [(&source1, a.err()), (&source2, b.err())]
                        .into_iter()
                        .filter_map(|(source, e)| e.map(|e| (source, e)))
                        .map(|(source, e)| {
                            tracing::warn!(
                                %source,
                                reason = e.reason(),
                                error = %e,
                                "image fetch failed"
                            );
                            format!("{}: {e}", e.reason())
                        })
                        .collect();
                    report(Verdict::FetchFailure, json, serde_json::json!({ "errors": errors }));
                    return Ok(ExitCode::from(2));
                }
            };

            let (verdict, detail) = match verifier.verify(&first, &second) {
                Ok(v) if v.verified => (Verdict::Match, serde_json::to_value(&v)?),
                Ok(v) => (Verdict::NoMatch, serde_json::to_value(&v)?),
                Err(e) => {
                    tracing::warn!(
                        reason = e.reason(),
                        error = %e,
                        "verification error; reporting no match"
                    );
                    let detail = serde_json::json!({
                        "verified": false,
                        "reason": e.reason(),
                        "error": e.to_string(),
                    });
                    (Verdict::NoMatch, detail)
                }
            };
            report(
                verdict,
                json,
                serde_json::json!({ "backend": verifier.name(), "verification": detail }),
            );

            Ok(match verdict {
                Verdict::Match => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            })
        }
    }
}

/// Print the result line to stdout, or one JSON object.
fn report(verdict: Verdict, json: bool, detail: serde_json::Value) {
    if json {
        let mut out = serde_json::json!({ "verdict": verdict, "result": verdict.message() });
        if let (Some(out), Some(detail)) = (out.as_object_mut(), detail.as_object()) {
            out.extend(detail.clone());
        }
        println!("{out}");
    } else {
        println!("{}", verdict.message());
        tracing::debug!(%detail, "verification detail");
    }
}
