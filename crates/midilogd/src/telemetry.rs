//! Logging setup for the daemon.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a stderr fmt subscriber filtered by `directive`.
///
/// `directive` is anything `EnvFilter` accepts: a bare level or
/// `info,midilog=debug` style targets. A malformed directive falls back to
/// `info`.
pub fn init(directive: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}
