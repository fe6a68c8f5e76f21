// src/bin/crawl_once.rs
// One-shot crawl for system cron: prints the run summary as JSON.
// Exit code 0 on a successful run, 1 on a partial/failed run, 2 on a
// catastrophic error.

use legal_news_crawler::{job_from_environment, logging, run_news_crawler_job};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    logging::init();

    let job = job_from_environment()?;
    match run_news_crawler_job(&job).await {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("crawl failed: {e}");
            std::process::exit(2);
        }
    }
}
