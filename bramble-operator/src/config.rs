//! Operator configuration
//!
//! Defines all configurable parameters for the operator including
//! poll intervals, concurrency limits and the shape of the child
//! resources it creates.

use std::time::Duration;

/// Operator configuration
///
/// All intervals and limits are configurable to allow tuning
/// for different deployment scenarios (dev vs prod, small vs large clusters).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this operator instance (used in logs)
    pub instance_id: String,

    /// Namespace to watch, or all namespaces when `None`
    pub namespace: Option<String>,

    /// How long to wait before re-checking pending external work
    pub poll_interval: Duration,

    /// Max reconciles running at the same time (across executions)
    pub max_concurrent_reconciles: usize,

    /// Resource and scheduling settings handed to the reconciler
    pub reconcile: ReconcileSettings,

    /// Address the HTTP API binds to
    pub bind_addr: String,
}

/// Settings consumed by the reconciler and its components
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Host directory under which each execution gets its own source path
    pub source_root: String,

    /// Capacity requested for each execution's volume
    pub volume_capacity: String,

    /// Storage class of the volume and its claim
    pub storage_class: String,

    /// Image used by the clone job (must provide `sh` and `git`)
    pub clone_image: String,

    /// Pod retries a job gets before it is considered failed
    pub job_backoff_limit: i32,

    /// Max tasks executing at once per execution (0 = unlimited)
    pub max_parallel_tasks: usize,

    /// Requeue delay while external work is pending
    pub poll_interval: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            source_root: "/src".to_string(),
            volume_capacity: "1Gi".to_string(),
            storage_class: "standard".to_string(),
            clone_image: "alpine/git".to_string(),
            job_backoff_limit: 2,
            max_parallel_tasks: 0,
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl ReconcileSettings {
    /// Path the volume is mounted at inside jobs: `<source_root>/<execution>`
    pub fn source_path(&self, execution: &str) -> String {
        format!("{}/{}", self.source_root.trim_end_matches('/'), execution)
    }

    /// Node directory backing the volume: `<source_root>/<namespace>/<execution>`
    pub fn host_path(&self, namespace: &str, execution: &str) -> String {
        format!(
            "{}/{}/{}",
            self.source_root.trim_end_matches('/'),
            namespace,
            execution
        )
    }
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(instance_id: String) -> Self {
        Self {
            instance_id,
            namespace: None,
            poll_interval: Duration::from_secs(5),
            max_concurrent_reconciles: 4,
            reconcile: ReconcileSettings::default(),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - BRAMBLE_INSTANCE_ID (default: random UUID)
    /// - BRAMBLE_NAMESPACE (default: all namespaces)
    /// - BRAMBLE_POLL_INTERVAL (seconds, default: 5)
    /// - BRAMBLE_MAX_CONCURRENT_RECONCILES (default: 4)
    /// - BRAMBLE_MAX_PARALLEL_TASKS (default: 0, unlimited)
    /// - BRAMBLE_SOURCE_ROOT (default: /src)
    /// - BRAMBLE_VOLUME_CAPACITY (default: 1Gi)
    /// - BRAMBLE_STORAGE_CLASS (default: standard)
    /// - BRAMBLE_CLONE_IMAGE (default: alpine/git)
    /// - BRAMBLE_JOB_BACKOFF_LIMIT (default: 2)
    /// - BRAMBLE_BIND_ADDR (default: 0.0.0.0:8080)
    pub fn from_env() -> anyhow::Result<Self> {
        let instance_id = std::env::var("BRAMBLE_INSTANCE_ID")
            .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
        let mut config = Self::new(instance_id);

        config.namespace = std::env::var("BRAMBLE_NAMESPACE")
            .ok()
            .filter(|ns| !ns.is_empty());

        if let Some(secs) = env_parse::<u64>("BRAMBLE_POLL_INTERVAL")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        config.reconcile.poll_interval = config.poll_interval;

        if let Some(n) = env_parse::<usize>("BRAMBLE_MAX_CONCURRENT_RECONCILES")? {
            config.max_concurrent_reconciles = n;
        }

        if let Some(n) = env_parse::<usize>("BRAMBLE_MAX_PARALLEL_TASKS")? {
            config.reconcile.max_parallel_tasks = n;
        }

        if let Ok(root) = std::env::var("BRAMBLE_SOURCE_ROOT") {
            config.reconcile.source_root = root;
        }

        if let Ok(capacity) = std::env::var("BRAMBLE_VOLUME_CAPACITY") {
            config.reconcile.volume_capacity = capacity;
        }

        if let Ok(class) = std::env::var("BRAMBLE_STORAGE_CLASS") {
            config.reconcile.storage_class = class;
        }

        if let Ok(image) = std::env::var("BRAMBLE_CLONE_IMAGE") {
            config.reconcile.clone_image = image;
        }

        if let Some(limit) = env_parse::<i32>("BRAMBLE_JOB_BACKOFF_LIMIT")? {
            config.reconcile.job_backoff_limit = limit;
        }

        if let Ok(addr) = std::env::var("BRAMBLE_BIND_ADDR") {
            config.bind_addr = addr;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.instance_id.is_empty() {
            anyhow::bail!("instance_id cannot be empty");
        }

        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.max_concurrent_reconciles == 0 {
            anyhow::bail!("max_concurrent_reconciles must be greater than 0");
        }

        if self.max_concurrent_reconciles > usize::from(u16::MAX) {
            anyhow::bail!("max_concurrent_reconciles cannot exceed {}", u16::MAX);
        }

        if !self.reconcile.source_root.starts_with('/') {
            anyhow::bail!("source_root must be an absolute path");
        }

        if self.reconcile.volume_capacity.is_empty() {
            anyhow::bail!("volume_capacity cannot be empty");
        }

        if self.reconcile.clone_image.is_empty() {
            anyhow::bail!("clone_image cannot be empty");
        }

        if self.reconcile.job_backoff_limit < 0 {
            anyhow::bail!("job_backoff_limit cannot be negative");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Reads and parses an optional environment variable
///
/// Unset is `Ok(None)`; set but unparsable is an error rather than a silent default.
fn env_parse<T: std::str::FromStr>(key: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", key, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_concurrent_reconciles, 4);
        assert_eq!(config.reconcile.volume_capacity, "1Gi");
        assert_eq!(config.reconcile.max_parallel_tasks, 0);
        assert!(config.namespace.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Zero concurrency should fail
        config.max_concurrent_reconciles = 0;
        assert!(config.validate().is_err());
        config.max_concurrent_reconciles = 1;

        // Relative source root should fail
        config.reconcile.source_root = "src".to_string();
        assert!(config.validate().is_err());
        config.reconcile.source_root = "/var/bramble".to_string();

        config.reconcile.job_backoff_limit = -1;
        assert!(config.validate().is_err());
        config.reconcile.job_backoff_limit = 0;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_source_path() {
        let mut settings = ReconcileSettings::default();
        assert_eq!(settings.source_path("run-1"), "/src/run-1");
        settings.source_root = "/data/".to_string();
        assert_eq!(settings.source_path("run-1"), "/data/run-1");
    }

    #[test]
    fn test_host_path_includes_namespace() {
        let settings = ReconcileSettings::default();
        assert_eq!(settings.host_path("ci", "run-1"), "/src/ci/run-1");
        assert_ne!(settings.host_path("a", "run-1"), settings.host_path("b", "run-1"));
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        // Unique key so parallel tests do not interfere
        let key = "BRAMBLE_TEST_ENV_PARSE_GARBAGE";
        assert!(env_parse::<u64>(key).unwrap().is_none());
        unsafe { std::env::set_var(key, "ten") };
        assert!(env_parse::<u64>(key).is_err());
        unsafe { std::env::set_var(key, " 10 ") };
        assert_eq!(env_parse::<u64>(key).unwrap(), Some(10));
        unsafe { std::env::remove_var(key) };
    }
}
