use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

/// Installs the process-wide subscriber. Verbosity comes from `RUST_LOG`;
/// output is plain compact lines suitable for log shipping.
pub fn init() {
    Registry::default()
        .with(
            fmt::layer()
                .compact()
                .with_ansi(false)
                .with_filter(EnvFilter::from_default_env()),
        )
        .init();
}
