use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Our own crates at `info` (`debug` when verbose), dependencies only when they warn.
/// `RUST_LOG` overrides both.
const fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "warn,vaultkit=debug,vaultkit_core=debug"
    } else {
        "warn,vaultkit=info,vaultkit_core=info"
    }
}

/// Installs the global subscriber, writing to stderr so command output stays on stdout,
/// and routes `log` records from dependencies into it.
pub fn init(verbose: bool) -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .with_target(verbose)
            .with_writer(std::io::stderr),
    );
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}
