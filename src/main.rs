use colored::*;
use fusillade::{
    clap_args,
    config::Config,
    orchestrator::{Orchestrator, RunSummary},
};
use std::path::Path;
use term_table::{row, row::Row, rows, table_cell::*, Table, TableStyle};
use tracing::{info, subscriber::set_global_default, Subscriber};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = clap_args::parse();

    let log_level = if args.verbose { "debug" } else { "warn" };
    let subscriber = get_subscriber(log_level.into());
    init_subscriber(subscriber);

    // missing config file means run with the built-in defaults
    let config_path = Path::new(&args.config);
    let config = if config_path.exists() {
        Config::try_from_path(config_path)?
    } else {
        info!("no config at {}, using defaults", args.config);
        Config::default()
    };

    let mut orchestrator = Orchestrator::new(config);
    match orchestrator.run(&args.server).await {
        Ok(summary) => {
            print_summary(&summary);
            println!("\n{}", " Job done ".reversed().green());
            Ok(())
        }
        Err(err) => {
            println!("\n{} {}", " Run failed ".reversed().red(), err);
            std::process::exit(1);
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\n{}", " Summary ".reversed().green());

    let table = Table::builder()
        .rows(rows![
            row![
                TableCell::builder("Shots (ok/total)".bold()).build(),
                TableCell::builder("Trace".bold()).build(),
                TableCell::builder("Artifact".bold()).build(),
                TableCell::builder("Duration (s)".bold()).build()
            ],
            row![
                TableCell::new(format!("{}/{}", summary.shots_ok, summary.shots_fired)),
                TableCell::new(summary.trace_file.display().to_string()),
                TableCell::new(summary.artifact.display().to_string()),
                TableCell::new(format!("{:.3}s", summary.duration_secs))
            ]
        ])
        .style(TableStyle::rounded())
        .build();

    println!("{}", table.render());
}

fn get_subscriber(env_filter: String) -> impl Subscriber + Sync + Send {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .pretty()
        .finish()
}

fn init_subscriber(subscriber: impl Subscriber + Sync + Send) {
    set_global_default(subscriber).expect("Failed to set subscriber");
}
