use std::{env, sync::Arc};

use tiercache_node::cache::{BloomFilter, CacheOrchestrator, ExistenceFilter, KeySpace};
use tiercache_node::config::loader::load_config;
use tiercache_node::{CachePolicy, User, create_cluster_backends};
use tiercache_store::DynStore;
use tiercache_store_memory::InMemoryStore;

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From TIERCACHE_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (tiercache.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (TIERCACHE_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    tiercache_node::observability::init_tracing();

    let (config_path, source) = resolve_config_path();

    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );

    tiercache_node::observability::apply_logging_level(&cfg.logging.level);

    let backends = create_cluster_backends(&cfg.redis).await;

    // The node fronts an in-memory user table; a real deployment plugs its
    // own SystemOfRecord in here.
    let store = Arc::new(InMemoryStore::<User>::new());

    let ids = store.ids();
    let bloom = BloomFilter::from_items(
        ids.iter(),
        cfg.filter.expected_items,
        cfg.filter.false_positive_rate,
    );
    tracing::info!(
        ids = ids.len(),
        expected_items = cfg.filter.expected_items,
        bits = bloom.num_bits(),
        hashes = bloom.num_hashes(),
        "Existence filter built"
    );
    let filter = Arc::new(ExistenceFilter::new(bloom));

    let dyn_store: DynStore<User> = store;
    let cache = match CacheOrchestrator::<User>::builder()
        .store(dyn_store)
        .backends(&backends)
        .filter(filter)
        .key_space(KeySpace::new(
            cfg.cache.entity.as_str(),
            cfg.cache.schema_version.as_str(),
        ))
        .policy(CachePolicy::from(&cfg.cache))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Cache initialization failed: {e}");
            std::process::exit(2);
        }
    };

    let listener = cache.start_invalidation_listener().await;

    tracing::info!(
        mode = backends.mode(),
        entity = cache.key_space().entity(),
        version = cache.key_space().version(),
        "tiercache node ready"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!(
        in_flight = cache.background().in_flight(),
        "Shutting down, abandoning background tasks"
    );
    listener.abort();
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: TIERCACHE_CONFIG
/// 3. Default: tiercache.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return (path, ConfigSource::CliArgument);
            }
        }
    }

    if let Ok(path) = env::var("TIERCACHE_CONFIG") {
        if !path.is_empty() {
            return (path, ConfigSource::EnvironmentVariable);
        }
    }

    ("tiercache.toml".to_string(), ConfigSource::Default)
}
