use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub manifest: Manifest,
    #[serde(default)]
    pub fetch: Fetch,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub store: Store,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub spool: Spool,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// Loads `path` if it exists, otherwise returns the built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    pub label: String,
    /// 0 means unbounded fan-out.
    pub max_concurrency: usize,
    pub fail_on_item_errors: bool,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            label: "".into(),
            max_concurrency: 8,
            fail_on_item_errors: false,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub out_dir: String,
    pub work_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            work_dir: ".pixel-ingest-work".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// File path or http(s) URL; `{label}` is replaced with the batch label.
    pub source: String,
    pub skip_pattern: String,
    pub timeout_seconds: u64,
}
impl Default for Manifest {
    fn default() -> Self {
        Self {
            source: "{label}".into(),
            skip_pattern: "^\\s*#".into(),
            timeout_seconds: 30,
        }
    }
}

impl Manifest {
    pub fn resolve_source(&self, label: &str) -> String {
        self.source.replace("{label}", label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Fetch {
    pub timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub max_bytes: u64,
    pub user_agent: String,
}
impl Default for Fetch {
    fn default() -> Self {
        Self {
            timeout_seconds: 5,
            connect_timeout_seconds: 5,
            max_bytes: 50 * 1024 * 1024,
            user_agent: concat!("pixel-ingest/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub width: u32,
    pub height: u32,
    pub color_mode: String,
    pub output_format: String,
}
impl Default for Transform {
    fn default() -> Self {
        Self {
            width: 200,
            height: 200,
            color_mode: "grayscale".into(),
            output_format: "auto".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Store {
    pub backend: String,
    pub root: String,
    pub base_url: String,
    pub timeout_seconds: u64,
    /// Name of the environment variable holding a bearer token for `http`.
    pub bearer_token_env: String,
}
impl Default for Store {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root: "objects".into(),
            base_url: "".into(),
            timeout_seconds: 10,
            bearer_token_env: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub connect_timeout_seconds: u64,
    pub buffer: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub terminator: String,
}
impl Default for Status {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".into(),
            port: 9000,
            connect_timeout_seconds: 5,
            buffer: 1024,
            max_retries: 3,
            retry_delay_ms: 200,
            terminator: "\n".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Spool {
    pub to_disk: bool,
    pub keep_intermediates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub write_report_json: bool,
    pub report_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_report_json: true,
            report_filename: "report.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub allowed_schemes: Vec<String>,
    pub allow_local_files: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["http".into(), "https".into()],
            allow_local_files: false,
        }
    }
}
