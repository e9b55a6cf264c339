// Searches the market catalog from the command line.
//
//   market-search <query...>
//
// Config comes from the file named by MARKET_SYNC_CONFIG (a TOML file with a
// [sync] section) or from environment variables. Snapshots are kept in the
// configured storage dir, so a second run searches without the network.
use eyre::Result;
use market_sync::data_sync::DataSyncConfig;
use market_sync::utils::SyncConfigLoaderSync;
use market_sync::DataSyncService;
use tracing::info;
use tracing_subscriber::EnvFilter;

const RESULT_LIMIT: usize = 10;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("market_sync=info,warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}

fn load_config() -> Result<DataSyncConfig> {
    dotenvy::dotenv().ok();
    match std::env::var("MARKET_SYNC_CONFIG") {
        Ok(path) => Ok(DataSyncConfig::load_section_from_file_sync(path)?),
        Err(_) => DataSyncConfig::from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        eprintln!("usage: market-search <query>");
        std::process::exit(2);
    }

    let service = DataSyncService::new(load_config()?)?;
    let report = service.warm_start();
    // a restored catalog past its TTL is searched as is while the refresh lands
    let markets = service.refresh_catalog().await?;
    if report.catalog_markets == 0 {
        info!("Fetched catalog with {} markets", markets);
    }

    let hits = service.search_with_fallback(&query, RESULT_LIMIT).await?;
    if hits.is_empty() {
        println!("no markets match {query:?}");
        return Ok(());
    }

    for hit in &hits {
        println!(
            "{:>4}  {:>5.1}%  ${:>14.0}  {}  [{}]",
            hit.score, hit.market.probability, hit.market.volume_usd, hit.market.title, hit.market.id
        );
    }
    service.record_search(&hits[0].market);
    Ok(())
}
