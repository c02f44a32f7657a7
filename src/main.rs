// src/main.rs

use flowdag::state::RunStatus;
use flowdag::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("flowdag error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;

    let Some(report) = run(args).await? else {
        // Dry run: nothing executed.
        return Ok(0);
    };

    print_report(&report);

    // Exit code mirrors the run outcome so scripts can branch on it.
    let code = match report.status {
        RunStatus::Succeeded => 0,
        RunStatus::PartiallyFailed | RunStatus::Failed => 1,
        RunStatus::Cancelled => 130,
        RunStatus::InProgress => 1,
    };
    Ok(code)
}

fn print_report(report: &flowdag::engine::RunReport) {
    println!("run {} finished: {}", report.run_id, report.status);
    println!("  completed: {}", report.completed.len());
    if !report.failed.is_empty() {
        println!("  failed: {:?}", report.failed);
    }
    if !report.blocked.is_empty() {
        println!("  blocked: {:?}", report.blocked);
    }
    if !report.cancelled.is_empty() {
        println!("  cancelled: {:?}", report.cancelled);
    }
}
