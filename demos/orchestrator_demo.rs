use chrono::Duration;
use request_orchestrator::{
    Orchestrator, OrchestratorConfig, PrefetchStrategy, RequestOptions,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let base = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://httpbin.org/json".to_string());

    // Example 1: default orchestrator
    println!("=== Deduplicated request ===");
    let orchestrator = Orchestrator::new();
    let options = RequestOptions::get(&base);

    let start = std::time::Instant::now();
    match orchestrator.request(&options).await {
        Ok(value) => println!("First request took {:?} ({} bytes)", start.elapsed(), value.to_string().len()),
        Err(e) => println!("First request failed: {e}"),
    }

    let start = std::time::Instant::now();
    match orchestrator.request(&options).await {
        Ok(_) => println!("Second request took {:?} (cache hit)", start.elapsed()),
        Err(e) => println!("Second request failed: {e}"),
    }

    println!("Stats: {:?}", orchestrator.stats());
    println!("Cache stats: {:?}", orchestrator.cache_stats());

    // Example 2: tuned configuration with eager prefetch
    println!("\n=== Tuned configuration ===");
    let config = OrchestratorConfig {
        cache_ttl: Duration::seconds(30),
        max_cache_entries: 500,
        request_timeout: Duration::seconds(10),
        prefetch_strategy: PrefetchStrategy::Eager,
        ..OrchestratorConfig::default()
    };
    let tuned = Orchestrator::with_config(config)?;
    println!(
        "Prefetch lookahead margin: {}px",
        tuned.prefetcher().lookahead_margin_px()
    );
    println!("Prefetch stats: {:?}", tuned.prefetcher().stats());

    orchestrator.shutdown();
    tuned.shutdown();
    Ok(())
}
