//! Tracing subscriber setup for hosts embedding the pipeline.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Install a global subscriber.
///
/// `RUST_LOG` wins when set; otherwise Sidekick crates log at `info`, or
/// `debug` when `verbose`. With `json` every event is one JSON object per
/// line. Returns `false` if a subscriber was already installed.
pub fn init(verbose: bool, json: bool) -> bool {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    result.is_ok()
}

fn default_directives(level: &str) -> String {
    ["sidekick_core", "sidekick_config", "sidekick_providers", "sidekick_enhance", "sidekick_agent"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_cover_every_crate() {
        let directives = default_directives("debug");
        assert!(directives.contains("sidekick_providers=debug"));
        assert_eq!(directives.split(',').count(), 5);
    }

    #[test]
    fn second_init_is_harmless() {
        init(false, false);
        assert!(!init(true, true));
    }
}
