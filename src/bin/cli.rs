// MediaCore - Title Resolution and Playback Core
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use media_core::api::CatalogKey;
use media_core::download::{ProgressCallback, ProgressJob};
use media_core::{classify_delivery, ClientConfig, MediaPipeline, PreparedSource};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "media-core-cli")]
#[command(about = "MediaCore CLI - Desktop testing tool", long_about = None)]
struct Cli {
    /// Backend base URL
    #[arg(long, default_value = "http://localhost:8080")]
    base_url: String,

    /// Progress poll interval in milliseconds
    #[arg(long, default_value_t = 2000)]
    poll_interval_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a title to a playable URL, following backend preparation
    Resolve {
        #[command(flatten)]
        title: TitleArgs,
    },
    /// Resolve a title and prepare its decoder source
    Prepare {
        #[command(flatten)]
        title: TitleArgs,
    },
    /// Show the delivery strategy for a URL
    Classify { url: String },
    /// Read a catalog endpoint (cached for the process lifetime)
    Catalog {
        #[arg(value_enum)]
        endpoint: CatalogTarget,
        /// Title or genre, for endpoints that take one
        key: Option<String>,
        /// Season label, for season metadata
        #[arg(long)]
        season: Option<String>,
    },
}

#[derive(clap::Args)]
struct TitleArgs {
    /// Movie or series title
    title: String,
    /// Season label (episodes only)
    #[arg(long, requires = "episode")]
    season: Option<String>,
    /// Episode label (episodes only)
    #[arg(long, requires = "season")]
    episode: Option<String>,
}

impl TitleArgs {
    fn key(&self) -> Result<CatalogKey> {
        let key = match (&self.season, &self.episode) {
            (Some(season), Some(episode)) => CatalogKey::episode(&self.title, season, episode),
            _ => CatalogKey::movie(&self.title),
        };
        key.context("Invalid title")
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CatalogTarget {
    Movies,
    Series,
    Metadata,
    Card,
    Genres,
}

fn print_progress() -> ProgressCallback {
    Arc::new(|job: ProgressJob| println!("  {}", job.display_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::builder()
        .base_url(&cli.base_url)
        .poll_interval(Duration::from_millis(cli.poll_interval_ms))
        .build();

    match cli.command {
        Commands::Classify { url } => {
            println!("{:?}", classify_delivery(url));
        }
        Commands::Resolve { title } => {
            let pipeline = MediaPipeline::new(config).context("Failed to create pipeline")?;
            let key = title.key()?;
            println!("Resolving {}...", key);
            let url = pipeline
                .resolve_and_track_title(&key, print_progress())
                .await
                .with_context(|| format!("Failed to resolve {}", key))?;
            println!("{}", url);
        }
        Commands::Prepare { title } => {
            let pipeline = MediaPipeline::new(config).context("Failed to create pipeline")?;
            let key = title.key()?;
            let url = pipeline
                .resolve_and_track_title(&key, print_progress())
                .await
                .with_context(|| format!("Failed to resolve {}", key))?;
            let source = pipeline
                .prepare_playback_source_with_progress(&url, print_progress())
                .await
                .context("Failed to prepare source")?;

            if let PreparedSource::Direct { reason, .. } = &source {
                println!("Buffered fetch failed, using direct URL: {}", reason);
            }
            println!("{}", serde_json::to_string_pretty(&source.descriptor())?);
        }
        Commands::Catalog {
            endpoint,
            key,
            season,
        } => {
            let pipeline = MediaPipeline::new(config).context("Failed to create pipeline")?;
            let catalog = pipeline.catalog();
            let required = || key.clone().context("This endpoint needs a title or genre");

            let value = match endpoint {
                CatalogTarget::Movies => catalog.movies().await?,
                CatalogTarget::Series => catalog.series().await?,
                CatalogTarget::Metadata => match &season {
                    Some(season) => catalog.season_metadata(&required()?, season).await?,
                    None => serde_json::to_value(catalog.metadata(&required()?).await?)?,
                },
                CatalogTarget::Card => catalog.card(&required()?).await?,
                CatalogTarget::Genres => match &key {
                    Some(genre) => catalog.genre_items(genre).await?,
                    None => catalog.genre_categories().await?,
                },
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}
