// src/main.rs

mod cli;

use clap::Parser;
use cli::Args;
use repo_harvester::harvest::discovery::ApiClient;
use repo_harvester::harvest::{
    BitbucketDiscoverer, Discoverer, GitCloner, GitHubDiscoverer, GitIndexer, HarvestPipeline,
    SeedDiscoverer,
};
use repo_harvester::{HarvesterConfig, JsonLinesDatabase, NullParser};
use std::error::Error;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let discoverers = build_discoverers(&config, &args.repositories)?;
    if discoverers.is_empty() {
        warn!("No discoverer enabled; nothing to harvest");
        return Ok(());
    }

    let database = JsonLinesDatabase::open(&config.output).await?;
    info!(output = %database.path().display(), "Writing code units");

    let mut pipeline = HarvestPipeline::new(
        Arc::new(GitCloner::from_config(&config)),
        Arc::new(GitIndexer::new()),
        Arc::new(NullParser),
        Arc::new(database),
    )
    .with_config(&config);
    for discoverer in discoverers {
        pipeline = pipeline.with_discoverer(discoverer);
    }

    let running = pipeline.start()?;
    let cancel = running.cancellation_token();
    let stop = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; shutting down");
            cancel.cancel();
        }
    });

    let stats = running.wait().await;
    stop.abort();

    println!(
        "Harvested {} code units from {} repositories ({} discovered, {} clone failures, {} timeouts) in {} ms",
        stats.units_inserted,
        stats.repositories_indexed,
        stats.discovered,
        stats.clone_failures,
        stats.clone_timeouts,
        stats.total_duration_ms
    );
    Ok(())
}

fn load_config(args: &Args) -> Result<HarvesterConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => HarvesterConfig::load(path)?,
        None => HarvesterConfig::default(),
    };
    if let Some(root) = &args.clone_root {
        config.clone_root = root.clone();
    }
    if let Some(output) = &args.output {
        config.output = output.clone();
    }
    if let Some(cloners) = args.cloners {
        config.cloners = cloners;
    }
    if let Some(indexers) = args.indexers {
        config.indexers = indexers;
    }
    if config.github.token.is_none() {
        config.github.token = std::env::var("GITHUB_TOKEN").ok();
    }
    config.validate()?;
    Ok(config)
}

fn build_discoverers(
    config: &HarvesterConfig,
    seeds: &[String],
) -> Result<Vec<Box<dyn Discoverer>>, Box<dyn Error>> {
    let client = |token: Option<String>| {
        ApiClient::new(&config.user_agent, config.request_timeout(), token)
    };

    let mut discoverers: Vec<Box<dyn Discoverer>> = Vec::new();
    if !seeds.is_empty() {
        let github = GitHubDiscoverer::new(
            client(config.github.token.clone())?,
            &config.github,
            config.default_rank,
        );
        discoverers.push(Box::new(SeedDiscoverer::new(seeds.to_vec(), github)));
        return Ok(discoverers);
    }

    if config.github.enabled {
        discoverers.push(Box::new(GitHubDiscoverer::new(
            client(config.github.token.clone())?,
            &config.github,
            config.default_rank,
        )));
    }
    if config.bitbucket.enabled {
        discoverers.push(Box::new(BitbucketDiscoverer::new(
            client(None)?,
            &config.bitbucket,
            config.default_rank,
        )));
    }
    Ok(discoverers)
}
