use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_ENV: &str = "SLNSTORE_LOG";

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

/// Install the stderr subscriber. Later calls leave the first one in place.
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::registry()
        .with(filter(verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init(false);
        init(true);
        tracing::info!("still logging");
    }
}
