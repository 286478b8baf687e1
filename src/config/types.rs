use serde::Deserialize;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub harvest: HarvestConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub tor: TorConfig,
    /// One entry per proxy-bound session; the pool size is the shard count
    #[serde(rename = "circuit", default)]
    pub circuits: Vec<CircuitConfig>,
    pub output: OutputConfig,
}

/// Harvest behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Sitemap URL pattern, `#` is replaced by the sitemap page number
    #[serde(rename = "sitemap-url")]
    pub sitemap_url: String,

    /// Number of sitemap pages to read (1..=sitemap_pages)
    #[serde(rename = "sitemap-pages")]
    pub sitemap_pages: u32,

    /// Concurrent course harvests inside one shard
    #[serde(rename = "threads-per-shard", default = "default_threads_per_shard")]
    pub threads_per_shard: u32,

    /// Reviews listed on one review page
    #[serde(rename = "reviews-per-page", default = "default_reviews_per_page")]
    pub reviews_per_page: u32,

    /// Courses per pipeline run (0 processes every course in one run)
    #[serde(rename = "batch-size", default)]
    pub batch_size: usize,

    /// Skip course URLs that are already persisted
    #[serde(rename = "skip-known-courses", default = "default_true")]
    pub skip_known_courses: bool,

    /// Whole-request timeout (seconds)
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Connect timeout (seconds)
    #[serde(rename = "connect-timeout", default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Anonymizing-network control settings shared by all circuits
#[derive(Debug, Clone, Deserialize)]
pub struct TorConfig {
    /// Control port address (e.g. "127.0.0.1:9051")
    #[serde(rename = "control-address", default)]
    pub control_address: Option<String>,

    /// Password for the control port AUTHENTICATE command
    #[serde(rename = "control-password", default)]
    pub control_password: Option<String>,

    /// Minimum time between two rotations of one circuit (milliseconds)
    #[serde(rename = "rotation-interval", default = "default_rotation_interval")]
    pub rotation_interval: u64,

    /// Rotate a circuit after this many successful requests (0 disables)
    #[serde(rename = "rotate-after-requests", default)]
    pub rotate_after_requests: u32,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            control_address: None,
            control_password: None,
            rotation_interval: default_rotation_interval(),
            rotate_after_requests: 0,
        }
    }
}

/// One outbound circuit
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CircuitConfig {
    /// Proxy URL (e.g. "socks5h://127.0.0.1:9050"); `None` connects directly
    #[serde(default)]
    pub proxy: Option<String>,

    /// Control port for this circuit's daemon, overriding `[tor]`
    #[serde(rename = "control-address", default)]
    pub control_address: Option<String>,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite document store
    #[serde(rename = "database-path")]
    pub database_path: String,
}

fn default_threads_per_shard() -> u32 {
    2
}

fn default_reviews_per_page() -> u32 {
    20
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_rotation_interval() -> u64 {
    10_000
}
