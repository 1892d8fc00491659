//! Tracing subscriber setup

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install a global subscriber filtered by `filter`
///
/// `filter` uses `EnvFilter` directive syntax, e.g. `sentinel_core=debug,info`.
/// With `json` set, events are written as one JSON object per line.
///
/// # Errors
/// Fails on an empty or malformed filter, or if a global subscriber is
/// already installed.
pub fn init_tracing(filter: &str, json: bool) -> Result<()> {
    let filter = build_env_filter(filter)?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_span_list(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .context("failed to initialize tracing subscriber")
}

fn build_env_filter(raw: &str) -> Result<EnvFilter> {
    if raw.trim().is_empty() {
        return Err(anyhow!("tracing filter cannot be empty"));
    }
    EnvFilter::try_new(raw).with_context(|| format!("invalid tracing filter '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_filter() {
        assert!(build_env_filter("  ").is_err());
    }

    #[test]
    fn accepts_directives() {
        assert!(build_env_filter("sentinel_core=debug,info").is_ok());
    }
}
