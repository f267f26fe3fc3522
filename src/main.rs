use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use listql::config::AppConfig;
use listql::db::create_pool;
use listql::query::Record;
use listql::search::SearchClient;
use listql::{ListResponse, ListService, QueryProviderFactory};

/// List entity records from PostgreSQL or Elasticsearch using a REST-style query string
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// List the registered entities and exit
    #[arg(long = "entities")]
    entities: bool,

    /// Entity to list, e.g. Order
    #[arg(required_unless_present = "entities")]
    entity: Option<String>,

    /// Query string, e.g. 'filter[where][Currency]=USD&filter[limit]=10'
    #[arg(default_value = "")]
    query: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("listql=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&config_path)?;
    let registry = Arc::new(config.registry().context("Invalid entity configuration")?);

    if cli.entities {
        for name in registry.names() {
            println!("{}", name);
        }
        return Ok(());
    }
    let Some(entity) = cli.entity else {
        anyhow::bail!("no entity given");
    };

    // Resolve password: PGPASSWORD env var, then interactive prompt
    if config.postgres.password.is_empty() {
        if let Ok(pw) = std::env::var("PGPASSWORD") {
            config.postgres.password = pw;
        } else {
            let prompt = format!("Password for {}: ", config.postgres.display_string());
            config.postgres.password = rpassword::read_password_from_tty(Some(&prompt))?;
        }
    }

    let pool = create_pool(&config.postgres)?;
    let mut factory = QueryProviderFactory::new(Arc::new(pool), registry.clone());
    if let Some(elastic) = &config.elastic {
        let client = SearchClient::new(elastic).context("Failed to build search client")?;
        factory = factory.with_search(client, elastic.index_prefix.clone());
    }

    let service = ListService::new(registry, factory, config.api.max_list_size);
    let response: ListResponse<Record> = service
        .list(&entity, &cli.query)
        .await
        .with_context(|| format!("Failed to list {}", entity))?;

    for (name, value) in response.headers() {
        println!("{}: {}", name, value);
    }
    println!("{}", serde_json::to_string_pretty(&response.records)?);
    Ok(())
}
