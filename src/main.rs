use std::sync::Arc;

use tracing::{error, info};

use aggregator::{
    rss, AggregatorError, Config, Database, FeedService, HttpFetcher, Reconciler,
    RegisterFeedRequest,
};

const CONFIG_PATH: &str = "config.toml";

const USAGE: &str = "usage: aggregator [--once | add <feed-url> | list]";

/// What the binary was asked to do.
enum Command {
    /// Run passes on the configured interval until interrupted.
    Serve,
    /// Run a single pass and exit.
    Once,
    /// Register a feed.
    Add(String),
    /// Print registered feeds.
    List,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Option<Command> {
    let command = match args.next().as_deref() {
        None => Command::Serve,
        Some("--once") => Command::Once,
        Some("add") => Command::Add(args.next()?),
        Some("list") => Command::List,
        Some(_) => return None,
    };
    if args.next().is_some() {
        return None;
    }
    Some(command)
}

#[tokio::main]
async fn main() {
    let Some(command) = parse_args(std::env::args().skip(1)) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    // Load configuration
    let config = match Config::load_with_env(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {CONFIG_PATH}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = aggregator::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        aggregator::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = run(config, command).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config, command: Command) -> aggregator::Result<()> {
    config.validate()?;

    info!("Aggregator {}", env!("CARGO_PKG_VERSION"));

    let db = Database::open(&config.database.url, config.database.max_connections).await?;
    let fetcher = Arc::new(HttpFetcher::new(&config.rss)?);

    let result = execute(&config, &db, fetcher, command).await;
    db.close().await;
    result
}

async fn execute(
    config: &Config,
    db: &Database,
    fetcher: Arc<HttpFetcher>,
    command: Command,
) -> aggregator::Result<()> {
    match command {
        Command::Add(link) => {
            let service = FeedService::new(db, fetcher.as_ref())
                .allow_private_hosts(config.rss.allow_private_hosts);
            let feed = service
                .register_feed(&RegisterFeedRequest::new(link))
                .await?;
            println!("{}\t{}\t{}", feed.id, feed.link, feed.title);
        }
        Command::List => {
            let service = FeedService::new(db, fetcher.as_ref());
            for feed in service.list_feeds().await? {
                let state = if feed.fetched { "fetched" } else { "pending" };
                println!("{}\t{}\t{}\t{}", feed.id, state, feed.link, feed.title);
            }
        }
        Command::Once => {
            reconciler(config, db, fetcher).run_pass().await?;
        }
        Command::Serve => serve(config, db, fetcher).await?,
    }
    Ok(())
}

fn reconciler(config: &Config, db: &Database, fetcher: Arc<HttpFetcher>) -> Reconciler {
    Reconciler::new(db.clone(), fetcher)
        .with_conditional_requests(config.rss.conditional_requests)
        .with_allow_private_hosts(config.rss.allow_private_hosts)
}

async fn serve(
    config: &Config,
    db: &Database,
    fetcher: Arc<HttpFetcher>,
) -> aggregator::Result<()> {
    if !config.rss.enabled {
        info!("Feed updates are disabled; nothing to do");
        return Ok(());
    }

    let updater = rss::start_rss_updater(
        reconciler(config, db, fetcher),
        config.rss.update_interval_secs,
    );

    tokio::signal::ctrl_c().await.map_err(AggregatorError::Io)?;
    info!("Shutting down");
    updater.abort();
    Ok(())
}
