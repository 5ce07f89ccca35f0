use std::env;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub staging_dir: PathBuf,
    pub models_dir: PathBuf,
    pub max_dimension: u32,
    pub max_upload_bytes: usize,
    pub engine_quiet: bool,
    pub use_gpu: bool,
    pub auto_download: bool,
}

fn flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| match v.as_str() {
            "1" | "true" | "TRUE" => true,
            "0" | "false" | "FALSE" => false,
            _ => default,
        })
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let host = env::var("FACEMATCH_HOST").ok().and_then(|v| v.parse().ok()).unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let port = env::var("FACEMATCH_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(9001);
        let staging_dir = env::var("FACEMATCH_STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("facematch"));
        let models_dir = env::var("FACEMATCH_MODELS_DIR").unwrap_or_else(|_| "models".to_string());
        // A zero bound would make every image collapse to 1px.
        let max_dimension = env::var("FACEMATCH_MAX_DIMENSION")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v: &u32| v > 0)
            .unwrap_or(1024);
        let max_upload_bytes = env::var("FACEMATCH_MAX_UPLOAD_BYTES").ok().and_then(|v| v.parse().ok()).unwrap_or(20 * 1024 * 1024);
        Self {
            host,
            port,
            staging_dir,
            models_dir: PathBuf::from(models_dir),
            max_dimension,
            max_upload_bytes,
            engine_quiet: flag("FACEMATCH_ENGINE_QUIET", true),
            use_gpu: flag("FACEMATCH_USE_GPU", false),
            auto_download: flag("FACEMATCH_AUTO_DOWNLOAD", true),
        }
    }
}
