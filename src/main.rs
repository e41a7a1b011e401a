use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use multimodal_rag::processing::{Question, RagApi, RagService};
use multimodal_rag::{api, config, logging};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "mmrag",
    about = "Multimodal RAG over PDF text, tables and figures"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, summarize and index a PDF, replacing the active collection.
    Ingest { path: PathBuf },
    /// Answer a query from the ingested document.
    Ask {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Image to summarize and prepend to the query; repeatable.
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },
    /// Remove the collection and its persisted state.
    Clear,
    /// Serve the HTTP API.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(match cli.command {
        Command::Serve => "info",
        _ => "warn",
    });
    let mut config = config::init_config()
        .context("Failed to load configuration")?
        .clone();

    match cli.command {
        Command::Ingest { path } => {
            let service = RagService::from_config(&config);
            let report = service
                .ingest(path)
                .await
                .context("Ingestion failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Ask {
            query,
            top_k,
            images,
        } => {
            if let Some(k) = top_k {
                config.top_k = k;
            }
            let service = RagService::from_config(&config);
            service
                .restore()
                .await
                .context("Failed to restore collection")?;
            let answer = service
                .ask(Question {
                    query,
                    attachments: images,
                })
                .await
                .context("Failed to answer query")?;
            println!("{answer}");
        }
        Command::Clear => {
            let service = RagService::from_config(&config);
            service.clear().await.context("Failed to clear collection")?;
            println!("Cleared collection '{}'", config.collection_name);
        }
        Command::Serve => {
            let service = Arc::new(RagService::from_config(&config));
            if let Some(report) = service
                .restore()
                .await
                .context("Failed to restore collection")?
            {
                tracing::info!(
                    restored = report.restored,
                    reindexed = report.reindexed,
                    pruned = report.pruned,
                    "Restored persisted collection"
                );
            }
            let app = api::create_router(service);

            let (listener, port) = bind_listener(config.server_port)
                .await
                .context("Failed to bind listener")?;
            tracing::info!("Listening on http://0.0.0.0:{}", port);
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}

async fn bind_listener(configured: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = configured {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
