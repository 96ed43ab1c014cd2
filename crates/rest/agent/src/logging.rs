use tracing_subscriber::EnvFilter;

/// Used when `RUST_LOG` is unset or empty.
pub const DEFAULT_DIRECTIVES: &str = "rest_core=info,rest_agent=info,screenrest_daemon=info";

/// Filter from `RUST_LOG`, falling back to info for our own crates.
pub fn env_filter(env: &str) -> EnvFilter {
    let directives = if env.trim().is_empty() {
        DEFAULT_DIRECTIVES
    } else {
        env
    };
    EnvFilter::builder().parse_lossy(directives)
}

pub fn init() {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    tracing_subscriber::fmt().with_env_filter(env_filter(&env)).init();
}
