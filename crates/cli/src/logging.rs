use std::io::IsTerminal;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the stderr subscriber.
///
/// `-v` flags take precedence over `RUST_LOG`; without either only warnings
/// are shown.
pub fn init(verbosity: u8) -> eyre::Result<()> {
    let filter = match verbosity {
        0 => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn"))?,
        1 => EnvFilter::try_new("debug")?,
        _ => EnvFilter::try_new("trace")?,
    };

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .compact()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
