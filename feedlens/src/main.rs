//! CLI entrypoint. Grounded on the teacher's `main.rs`: clap-derived args,
//! `tracing_subscriber` with `EnvFilter`, config load, pool init, worker
//! start, `ctrl_c` shutdown.

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use common::Config;
use feedlens::classifier::{Classifier, RemoteClassifier};
use feedlens::extractor::ArticleExtractor;
use feedlens::feed_parser::FeedParser;
use feedlens::feed_processor::FeedProcessor;
use feedlens::models::{Feedback, ItemFilter};
use feedlens::preference_manager::PreferenceManager;
use feedlens::query::Query;
use feedlens::retry::RetryPolicy;
use feedlens::scheduler::{Scheduler, SchedulerConfig};
use feedlens::store::{ensure_schema, Store};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(ClapParser, Debug)]
#[command(name = "feedlens", about = "Personalized news aggregator")]
struct Cli {
    /// Path to config.toml (overrides config.default.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start the query/admin surface only; skip the background scheduler.
    #[arg(long)]
    no_worker: bool,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Admin operations: forcing a cycle, resetting stuck item state.
    #[command(subcommand)]
    Admin(AdminCommand),
    /// Add a subscription.
    AddFeed {
        url: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value_t = 1800)]
        interval_seconds: i64,
    },
    /// List subscriptions.
    ListFeeds {
        #[arg(long)]
        enabled_only: bool,
    },
    /// Record feedback on an item.
    Feedback {
        item_id: i64,
        #[arg(value_parser = ["like", "dislike"])]
        verdict: String,
    },
    /// Print classified items above a score threshold.
    Items {
        #[arg(long, default_value_t = 0.0)]
        min_score: f64,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// Synchronously run one UpdateFeed cycle for a single feed.
    UpdateFeedNow { feed_id: i64 },
    /// Synchronously run one ProcessItem cycle for a single item.
    ExtractContentNow { item_id: i64 },
    /// Clear extracted_at/classified_at on an item so it is reprocessed
    /// (spec §9: "resetting extracted_at/classified_at is an admin operation").
    ResetExtraction { item_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");
    let config = Config::load_with_defaults(
        default_path.exists().then_some(default_path.as_path()),
        cli.config.as_deref(),
    )
    .await
    .context("loading configuration")?;

    let pool = common::init_db_pool(&config.database.path)
        .await
        .context("opening database")?;
    ensure_schema(&pool).await.context("ensuring schema")?;
    let store = Store::new(pool);

    match cli.command {
        Some(cmd) => return run_command(cmd, &store, &config).await,
        None => {}
    }

    if cli.no_worker {
        tracing::info!("worker disabled (--no-worker); exiting after schema check");
        return Ok(());
    }

    let (processor, preference_manager) = build_pipeline(&store, &config)?;

    let scheduler_config = SchedulerConfig {
        update_interval: Duration::from_secs(config.scheduler.update_interval_seconds.unwrap_or(1800)),
        cleanup_interval: Duration::from_secs(config.scheduler.cleanup_interval_seconds.unwrap_or(0)),
        cleanup_age_days: config.scheduler.cleanup_age_days.unwrap_or(30),
        cleanup_min_score: config.scheduler.cleanup_min_score.unwrap_or(5.0),
    };

    let mut scheduler = Scheduler::new(store.clone(), processor, preference_manager, scheduler_config);
    scheduler.start();

    tracing::info!("feedlens started, awaiting ctrl-c");
    tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
    tracing::info!("shutdown signal received, draining workers");
    scheduler.stop().await;

    Ok(())
}

fn build_pipeline(store: &Store, config: &Config) -> Result<(Arc<FeedProcessor>, Arc<PreferenceManager>)> {
    let politeness = config.politeness.clone().unwrap_or(common::PolitenessConfig {
        fetch_timeout_seconds: Some(30),
        extract_timeout_seconds: Some(30),
    });
    let fetch_timeout = politeness.fetch_timeout_seconds.unwrap_or(30);
    let extract_timeout = politeness.extract_timeout_seconds.unwrap_or(30);

    let parser = Arc::new(FeedParser::new(fetch_timeout));
    let extractor = Arc::new(ArticleExtractor::new(extract_timeout));
    let classifier = build_classifier(config)?;

    let max_workers = config.worker.max_workers.unwrap_or(5);
    let processor = Arc::new(FeedProcessor::new(
        store.clone(),
        parser,
        extractor,
        classifier.clone(),
        RetryPolicy::default(),
        max_workers,
    ));

    let threshold = config
        .scoring
        .as_ref()
        .and_then(|s| s.preference_summary_threshold)
        .or(config.worker.preference_update_threshold)
        .unwrap_or(25);
    let preference_manager = Arc::new(PreferenceManager::new(
        store.clone(),
        classifier,
        RetryPolicy::default(),
        threshold,
    ));

    Ok((processor, preference_manager))
}

fn build_classifier(config: &Config) -> Result<Arc<dyn Classifier>> {
    let llm = config
        .llm
        .as_ref()
        .and_then(|l| l.background.clone().or_else(|| l.remote.clone()))
        .context("no [llm.background] or [llm.remote] configuration section found")?;

    let api_url = llm.api_url.context("llm config missing api_url")?;
    let api_key = llm
        .api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok())
        .unwrap_or_default();
    let model = llm.model.unwrap_or_else(|| "gpt-4o-mini".to_string());
    let timeout = llm.timeout_seconds.unwrap_or(60);

    Ok(Arc::new(RemoteClassifier::new(api_url, api_key, model, timeout)))
}

async fn run_command(cmd: Command, store: &Store, config: &Config) -> Result<()> {
    let query = Query::new(store.clone());

    match cmd {
        Command::Admin(AdminCommand::UpdateFeedNow { feed_id }) => {
            let (processor, _) = build_pipeline(store, config)?;
            processor.update_feed_now(feed_id).await?;
            println!("feed {} updated", feed_id);
        }
        Command::Admin(AdminCommand::ExtractContentNow { item_id }) => {
            let (processor, _) = build_pipeline(store, config)?;
            processor.extract_content_now(item_id).await?;
            println!("item {} processed", item_id);
        }
        Command::Admin(AdminCommand::ResetExtraction { item_id }) => {
            store.reset_extraction(item_id).await?;
            println!("item {} extraction/classification state reset", item_id);
        }
        Command::AddFeed { url, title, interval_seconds } => {
            let feed = query.add_feed(&url, &title, interval_seconds).await?;
            println!("added feed {} ({})", feed.id, feed.display_name());
        }
        Command::ListFeeds { enabled_only } => {
            for feed in query.list_feeds(enabled_only).await? {
                println!("{}\t{}\t{}", feed.id, feed.display_name(), feed.url);
            }
        }
        Command::Feedback { item_id, verdict } => {
            let feedback = Feedback::parse(&verdict).context("invalid feedback verdict")?;
            let like_delta = config.scoring.as_ref().and_then(|s| s.like_delta).unwrap_or(1.0);
            let dislike_delta = config.scoring.as_ref().and_then(|s| s.dislike_delta).unwrap_or(-2.0);
            query.give_feedback(item_id, feedback, like_delta, dislike_delta, None).await?;
            println!("recorded {} on item {}", verdict, item_id);
        }
        Command::Items { min_score, limit } => {
            let mut filter = ItemFilter::new();
            filter.min_score = min_score;
            filter.limit = limit;
            let (items, total) = query.classified_items(&filter).await?;
            for item in &items {
                println!("{:.1}\t{}\t{}", item.relevance_score, item.feed_name, item.title);
            }
            println!("({} of {} shown)", items.len(), total);
        }
    }

    Ok(())
}
