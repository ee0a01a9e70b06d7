use std::error::Error;
use usage_stats::config::StatsConfig;
use usage_stats::observability::init_tracing;
use usage_stats::persistence::{CounterRepository, InMemoryRepository, JsonFileRepository};
use usage_stats::{StatsService, SubscribeReport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = StatsConfig::load()?;
    init_tracing(&config.log);

    match &config.persistence.data_path {
        Some(path) => run(JsonFileRepository::open(path).await?, &config).await,
        None => run(InMemoryRepository::new(), &config).await,
    }
}

async fn run<R: CounterRepository>(repo: R, config: &StatsConfig) -> Result<(), Box<dyn Error>> {
    let service = StatsService::new(repo, config);
    let sweeper = service.spawn_sweeper(config.cache.sweep_interval);

    println!("=== Usage Stats Replay ===\n");

    replay_plugin_installs(&service).await?;
    replay_subscription_lifecycle(&service).await?;
    replay_listing(&service).await?;

    sweeper.abort();
    let stats = service.cache_stats();
    println!(
        "\n=== Replay completed (cache hits: {}, misses: {}) ===",
        stats.hits, stats.misses
    );
    Ok(())
}

async fn replay_plugin_installs<R: CounterRepository>(
    service: &StatsService<R>,
) -> Result<(), Box<dyn Error>> {
    println!("--- Plugin installs ---");

    service.report_plugin_install("AutoSignIn").await?;
    let batch: Vec<String> = ["AutoSignIn", "ChineseSubFinder", "DoubanSync"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    service.report_plugin_installs(&batch).await?;

    for (plugin_id, count) in service.plugin_statistics().await?.iter() {
        println!("  {:<20} {}", plugin_id, count);
    }
    println!();
    Ok(())
}

async fn replay_subscription_lifecycle<R: CounterRepository>(
    service: &StatsService<R>,
) -> Result<(), Box<dyn Error>> {
    println!("--- Subscription lifecycle (tmdbid=603, season=1) ---");

    let report = SubscribeReport::tmdb(603, Some(1))
        .with_name("The Matrix")
        .with_media_type("电视剧");

    println!("  add  -> count {}", service.report_subscribe_add(&report).await?);
    println!("  add  -> count {}", service.report_subscribe_add(&report).await?);
    println!("  done -> deleted {}", service.report_subscribe_done(&report).await?);
    println!("  done -> deleted {}", service.report_subscribe_done(&report).await?);
    println!("  done -> deleted {}", service.report_subscribe_done(&report).await?);
    println!();
    Ok(())
}

async fn replay_listing<R: CounterRepository>(
    service: &StatsService<R>,
) -> Result<(), Box<dyn Error>> {
    println!("--- Subscription listing (type=电影) ---");

    let reports = vec![
        SubscribeReport::tmdb(27205, None)
            .with_name("Inception")
            .with_media_type("电影"),
        SubscribeReport::douban("1292052", None)
            .with_name("肖申克的救赎")
            .with_media_type("电影"),
        SubscribeReport::tmdb(27205, None)
            .with_name("Inception")
            .with_media_type("电影"),
    ];
    service.report_subscribes(&reports).await?;

    for row in service.subscribe_statistics("电影", 1, 30).await?.iter() {
        println!(
            "  {:<20} {:<16} {}",
            row.attributes.name.as_deref().unwrap_or("-"),
            row.identity.to_string(),
            row.count
        );
    }
    Ok(())
}
