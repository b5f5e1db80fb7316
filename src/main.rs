use auerswald_lcr::adapters::{Listing, PbxClient, WriterSink};
use auerswald_lcr::config::{Command, ListingKind};
use auerswald_lcr::utils::{logger, validation::Validate};
use auerswald_lcr::{CliConfig, LcrConfig, LcrDocument, LcrError};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    logger::init_cli_logger(cli.verbose, false);
    tracing::debug!("CLI config: {:?}", cli);

    if let Err(e) = run(cli).await {
        tracing::error!("❌ {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        if let LcrError::RejectedError { messages } = &e {
            for message in messages {
                eprintln!("   {}", message);
            }
        }
        eprintln!("💡 {}", e.recovery_suggestion());
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: CliConfig) -> Result<(), LcrError> {
    let config = LcrConfig::from_file(&cli.config)?;
    config.validate()?;

    // Fail on a bad upload file before touching the PBX.
    let upload = match &cli.command {
        Command::Upload { file } => Some(load_document(file)?),
        _ => None,
    };

    let mut client = PbxClient::new(&config.pbx)?;
    if let Some(path) = &cli.trace_file {
        let file = std::fs::File::create(path)?;
        client = client.with_debug_sink(Arc::new(WriterSink::new(file)));
    } else if cli.wire_trace_enabled() {
        client = client.with_debug_sink(Arc::new(WriterSink::new(std::io::stderr())));
    }

    let session = client.authenticate().await?;

    match cli.command {
        Command::Download { pretty, file } => {
            let document = session.download().await?;
            let content = if pretty {
                document.pretty()?
            } else {
                document.as_str().to_string()
            };
            std::fs::write(&file, content)?;
            println!("✅ LCR tables written to {}", file.display());
        }
        Command::Upload { file } => {
            if let Some((filename, document)) = upload {
                session.upload(&filename, &document).await?;
                println!("✅ {} uploaded", file.display());
            }
        }
        Command::Defaults => {
            session.reset_to_defaults().await?;
            println!("✅ LCR reset to defaults");
        }
        Command::Erase => {
            session.erase().await?;
            println!("✅ LCR networks and providers erased");
        }
        Command::List { kind } => {
            let listing = match kind {
                ListingKind::Networks => Listing::Networks,
                ListingKind::Providers => Listing::Providers,
                ListingKind::Tables => Listing::Tables,
            };
            let value = session.list(listing).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}

fn load_document(path: &Path) -> Result<(String, LcrDocument), LcrError> {
    let document = LcrDocument::from_bytes(std::fs::read(path)?)?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lcr.xml".to_string());
    Ok((filename, document))
}
