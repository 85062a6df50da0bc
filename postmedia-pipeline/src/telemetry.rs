/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "postmedia=info,postmedia_pipeline=info,postmedia_drive=info,postmedia_cache=info";

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; only the first call installs anything.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Logging is left to the embedding application.
#[cfg(not(feature = "tracing-basic"))]
pub fn init_tracing() {}
