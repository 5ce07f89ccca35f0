use tracing_subscriber::EnvFilter;

/// `quiet_engine` silences ONNX Runtime below `error`; it logs through tracing under the `ort` target.
pub fn init(quiet_engine: bool) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = if quiet_engine { format!("{},ort=error", filter) } else { filter };
    let fmt = tracing_subscriber::fmt().with_env_filter(EnvFilter::new(filter)).with_ansi(false);
    fmt.init();
}
