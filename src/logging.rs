use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "fleishig=info";

/// Diagnostics go to stderr so stdout stays the command's own output.
/// `RUST_LOG` overrides the default filter; `--verbose` raises it to debug.
pub fn init_logging(verbose: bool) {
    let fallback = if verbose { "fleishig=debug" } else { DEFAULT_FILTER };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
