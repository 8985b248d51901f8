use tracing_subscriber::EnvFilter;

/// Logs go to stderr, stdout is reserved for reports. An explicit `level`
/// wins over `RUST_LOG`; with neither, `info`.
pub fn init(level: Option<&str>, json: bool) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    };
}
