use auerswald_lcr::core::cache_diff::{compare_caches, provider_slots, CacheSet};
use auerswald_lcr::utils::logger;
use auerswald_lcr::LcrError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lcr-cache-diff")]
#[command(about = "Compare the tariff caches of two archived LCR update runs")]
struct Args {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report differences between the YAML files of two run directories or archives
    Compare { left: PathBuf, right: PathBuf },
    /// List the time slots found in each YAML file of a run
    Slots { dir: PathBuf },
}

fn main() {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose, false);

    if let Err(e) = run(args.command) {
        eprintln!("❌ {}", e);
        std::process::exit(e.exit_code());
    }
}

fn run(command: Command) -> Result<(), LcrError> {
    match command {
        Command::Compare { left, right } => {
            let left = CacheSet::load(&left)?;
            let right = CacheSet::load(&right)?;
            // computed in full before printing so a failure never leaves a partial report
            let differences = compare_caches(&left, &right)?;
            for difference in &differences {
                println!("{}", difference);
            }
            println!("{} difference(s)", differences.len());
        }
        Command::Slots { dir } => {
            let set = CacheSet::load(&dir)?;
            for (file, slots) in provider_slots(&set)? {
                println!("{}: {:?}", file, slots);
            }
        }
    }
    Ok(())
}
