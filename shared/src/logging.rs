// JSON logging to stderr, filtered by RUST_LOG on top of a crate default.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Directives applied on top of `RUST_LOG`, one per crate.
pub fn default_directives(quiet: bool) -> [&'static str; 2] {
    if quiet {
        ["focusdim=error", "focusdim_shared=error"]
    } else {
        ["focusdim=info", "focusdim_shared=info"]
    }
}

pub fn init_logging(quiet: bool) {
    let mut filter = EnvFilter::from_default_env();
    for directive in default_directives(quiet) {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // A second call (tests, embedding hosts) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_parses() {
        for directive in default_directives(true).into_iter().chain(default_directives(false)) {
            let parsed: Result<tracing_subscriber::filter::Directive, _> = directive.parse();
            assert!(parsed.is_ok(), "{directive}");
        }
    }

    #[test]
    fn test_init_logging_twice_does_not_panic() {
        init_logging(true);
        init_logging(false);
    }
}
