use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset. `wire` enables the raw PBX exchange logged by
/// `TracingSink`, independent of `verbose`.
fn default_directives(verbose: bool, wire: bool) -> String {
    let mut directives = if verbose {
        vec!["auerswald_lcr=debug", "info"]
    } else {
        vec!["auerswald_lcr=info"]
    };
    if verbose || wire {
        directives.push("wire=debug");
    }
    directives.join(",")
}

fn env_filter(verbose: bool, wire: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose, wire)))
}

pub fn init_cli_logger(verbose: bool, wire: bool) {
    tracing_subscriber::registry()
        .with(env_filter(verbose, wire))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// JSON lines on stderr, for unattended runs whose output is collected by cron or syslog.
pub fn init_json_logger(verbose: bool, wire: bool) {
    tracing_subscriber::registry()
        .with(env_filter(verbose, wire))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json(),
        )
        .init();
}
