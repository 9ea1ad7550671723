//! Log subscriber setup for the `flowgate` binary and for embedding hosts.
//!
//! Library code only emits through the `tracing` macros; nothing is printed
//! unless a subscriber is installed, either by [`tracer::init_tracer`] or by
//! the host application.

#[cfg(feature = "trace")]
pub mod tracer {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::{layer::SubscriberExt, Layer, Registry};

    /// Install a global fmt subscriber writing to stderr.
    ///
    /// `RUST_LOG` directives take precedence over `level`. Set
    /// `FLOWGATE_LOG_FORMAT=json` for JSON lines and `FLOWGATE_DISABLE_LOGS`
    /// to skip installation entirely.
    pub fn init_tracer(level: Option<LevelFilter>) -> anyhow::Result<()> {
        if std::env::var("FLOWGATE_DISABLE_LOGS").is_ok() {
            return Ok(());
        }

        let default_filter = if cfg!(any(test, debug_assertions)) {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let default_filter = level.unwrap_or(default_filter);
        let filter_layer = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(default_filter.into())
            .from_env_lossy();

        let use_json = std::env::var("FLOWGATE_LOG_FORMAT")
            .map(|v| v.to_lowercase() == "json")
            .unwrap_or(false);
        let with_location = cfg!(any(test, debug_assertions));

        // Stdout carries replay output, so logs always go to stderr.
        let fmt_layer = if use_json {
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .json()
                .with_file(with_location)
                .with_line_number(with_location)
                .with_writer(std::io::stderr)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_file(with_location)
                .with_line_number(with_location)
                .with_writer(std::io::stderr)
                .boxed()
        };

        let subscriber = Registry::default().with(fmt_layer.with_filter(filter_layer));
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| anyhow::anyhow!("error setting subscriber: {e}"))?;
        Ok(())
    }
}
