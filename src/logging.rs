use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

pub fn init() {
    LOGGER_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    });
}
