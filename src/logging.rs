//! Tracing subscriber setup for the binary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Env var read before `RUST_LOG`.
pub const LOG_ENV: &str = "QBLINK_LOG";

/// Install a stderr `fmt` subscriber. Safe to call more than once.
pub fn init(verbose: bool) {
    let filter = filter_from_lookup(verbose, |name| std::env::var(name).ok());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false),
        )
        .try_init();
}

fn filter_from_lookup(verbose: bool, lookup: impl Fn(&str) -> Option<String>) -> EnvFilter {
    let directive = [LOG_ENV, "RUST_LOG"]
        .into_iter()
        .filter_map(|name| lookup(name))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty());
    match directive {
        Some(directive) => {
            EnvFilter::try_new(&directive).unwrap_or_else(|_| default_filter(verbose))
        }
        None => default_filter(verbose),
    }
}

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::new(if verbose { "qblink=debug" } else { "qblink=info" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qblink_log_wins_over_rust_log() {
        let filter = filter_from_lookup(false, |name| match name {
            LOG_ENV => Some("qblink=trace".into()),
            "RUST_LOG" => Some("warn".into()),
            _ => None,
        });
        assert_eq!(filter.to_string(), "qblink=trace");
    }

    #[test]
    fn verbose_default_is_debug() {
        assert_eq!(filter_from_lookup(true, |_| None).to_string(), "qblink=debug");
        assert_eq!(
            filter_from_lookup(false, |_| Some("  ".into())).to_string(),
            "qblink=info"
        );
    }
}
