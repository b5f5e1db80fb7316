use auerswald_lcr::adapters::{PbxClient, TracingSink};
use auerswald_lcr::utils::{logger, validation::Validate};
use auerswald_lcr::{
    ConfiguredDiffer, ConfiguredSource, LcrConfig, LcrError, UpdateEngine, UpdateOutcome,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lcr-update")]
#[command(about = "Upload fresh LCR tables to the PBX when they differ from the active ones")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "lcr.toml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Log every request and response exchanged with the PBX
    #[arg(long)]
    debug: bool,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.json_logs {
        logger::init_json_logger(args.verbose, args.debug);
    } else {
        logger::init_cli_logger(args.verbose, args.debug);
    }

    tracing::info!("📁 Loading configuration from: {}", args.config.display());

    match run(&args).await {
        Ok(UpdateOutcome::NoChange { run_id }) => {
            println!("✅ Run {}: PBX tables unchanged", run_id);
        }
        Ok(UpdateOutcome::Updated {
            run_id,
            differences,
            archive,
        }) => {
            println!(
                "✅ Run {}: uploaded new tables ({} difference(s)), archived to {}",
                run_id,
                differences,
                archive.display()
            );
        }
        Err(e) => {
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            if let LcrError::RejectedError { messages } = &e {
                for message in messages {
                    eprintln!("   {}", message);
                }
            }
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(args: &Args) -> Result<UpdateOutcome, LcrError> {
    let config = LcrConfig::from_file(&args.config)?;
    config.validate()?;

    let source_config = config.source.as_ref().ok_or_else(|| LcrError::MissingConfigError {
        field: "source".to_string(),
    })?;
    let source = ConfiguredSource::from_config(source_config)?;
    let differ = ConfiguredDiffer::from(&config.differ);

    let mut client = PbxClient::new(&config.pbx)?;
    if args.debug {
        client = client.with_debug_sink(Arc::new(TracingSink));
    }

    let engine = UpdateEngine::new(
        client,
        source,
        differ,
        config.work_dir(),
        config.archive_dir(),
    );
    engine.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from(["lcr-update", "-c", "/etc/lcr.toml", "--debug"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/lcr.toml"));
        assert!(args.debug);
        assert!(!args.verbose);

        let args = Args::try_parse_from(["lcr-update"]).unwrap();
        assert_eq!(args.config, PathBuf::from("lcr.toml"));
        assert!(!args.debug);
    }
}
