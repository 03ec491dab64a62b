use std::env;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output to stderr. `CHAT_MERGE_LOG` takes a full filter
/// expression and wins over `--verbose`.
pub fn init(verbose: bool) {
    let default = if verbose { "warn,chat_merge=debug" } else { "warn" };
    let filter = env::var("CHAT_MERGE_LOG")
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}
