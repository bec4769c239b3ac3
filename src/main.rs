use anyhow::Result;

use steprun::cli;
use steprun::config::Config;
use steprun::logging;
use steprun::runner::StepRunner;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // Load config
    let cfg = Config::load();
    logging::init(&cfg.get("LOGGING_LEVEL").unwrap_or_else(|| "info".to_string()));

    let step = args.step_config(&cfg)?;
    let code = StepRunner::new(step).run().await;
    if code != 0 {
        // teardown already ran inside the runner; hand the job's code
        // to the batch scheduler unchanged
        std::process::exit(code);
    }
    Ok(())
}
