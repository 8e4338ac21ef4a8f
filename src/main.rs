use azure_hub_spoke::azure::{AzCli, InMemoryApi, RemoteApi};
use azure_hub_spoke::models::StageName;
use azure_hub_spoke::output::{print_summary, render_checks};
use azure_hub_spoke::processing::ThreadSleeper;
use azure_hub_spoke::{parse_stages, LabConfig, Pipeline};
use colored::Colorize;
use itertools::Itertools;
use std::error::Error;
use std::path::PathBuf;

const USAGE: &str = "usage: azure-hub-spoke [hub|spoke|dns|all] [--config PATH] [--dry-run]";

struct Args {
    stages: Vec<StageName>,
    config: PathBuf,
    dry_run: bool,
}

fn parse_args() -> Result<Args, Box<dyn Error>> {
    let mut args = Args {
        stages: StageName::ALL.to_vec(),
        config: PathBuf::from("config/lab.json"),
        dry_run: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next().ok_or(USAGE)?.into(),
            "--dry-run" => args.dry_run = true,
            "-h" | "--help" => return Err(USAGE.into()),
            other => args.stages = parse_stages(other).ok_or_else(|| format!("unknown stage '{other}'\n{USAGE}"))?,
        }
    }
    Ok(args)
}

/// What the failed stage managed before it stopped.
fn print_summary_of_failed(pipeline: &mut Pipeline<'_, Box<dyn RemoteApi>>) {
    let journal = pipeline.reconciler_mut().take_journal();
    if !journal.is_empty() {
        println!("{}", journal.iter().map(|j| format!("{} {} '{}'", j.outcome, j.kind, j.id)).join("\n"));
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // Do as little as possible in main.rs as it can't contain any tests
    log4rs::init_file("log4rs.yml", Default::default())?;
    dotenv::dotenv().ok();
    //
    log::info!("#Start main()");

    let args = parse_args()?;
    let mut config = LabConfig::load(&args.config)?;

    let api: Box<dyn RemoteApi> = if args.dry_run {
        config.state_dir = config.state_dir.join("dry-run");
        log::warn!("dry run: nothing leaves this process, snapshots go to {}", config.state_dir.display());
        Box::new(InMemoryApi::new(&config.resource_group))
    } else {
        Box::new(AzCli::new(&config.resource_group))
    };

    let mut pipeline = Pipeline::new(&config, api, Box::new(ThreadSleeper));
    let reports = match pipeline.run(&args.stages) {
        Ok(reports) => reports,
        Err(e) => {
            print_summary_of_failed(&mut pipeline);
            eprintln!("{} {e}", "FAILED".on_red());
            std::process::exit(1);
        }
    };
    for report in &reports {
        print_summary(report.stage, &report.journal);
        if !report.checks.is_empty() {
            println!("{}", render_checks(&report.checks));
        }
    }

    log::info!("#End main()");
    Ok(())
}
