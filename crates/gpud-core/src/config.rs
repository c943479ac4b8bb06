//! Environment-driven settings
//!
//! All service configuration comes from environment variables; the task
//! catalog itself lives in YAML files under `TASK_CATALOG_DIR`. List values
//! are comma-separated, the difficulty map uses `id:class` pairs
//! (`"0:low,1:high"`).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{GpudError, GpudResult};
use crate::gpu::Difficulty;

/// Application settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// GPU device indices managed by this daemon
    pub gpu_device_ids: Vec<u32>,
    /// Difficulty class per device; devices absent from the map default to low
    pub gpu_device_difficulty: HashMap<u32, Difficulty>,
    /// Seconds between telemetry samples
    pub gpu_metrics_refresh_interval: u64,

    pub session_idle_timeout_seconds: u64,
    pub session_max_lifetime_seconds: u64,
    pub session_queue_max_size: usize,
    /// Seconds between reaper sweeps
    pub monitor_interval: u64,

    pub default_task_timeout: u64,
    pub max_task_timeout: u64,
    /// Docker memory limit per worker container (e.g. "16g")
    pub task_memory_limit: String,
    /// Docker CPU quota per worker container (microseconds per period)
    pub task_cpu_quota: i64,

    pub model_cache_dir: PathBuf,
    pub auto_fetch_models: bool,
    pub file_service_url: String,
    pub file_service_internal_key: String,

    pub internal_api_key: String,
    /// Empty list disables the image allow-list check
    pub allowed_docker_images: Vec<String>,

    /// Directory holding the three catalog YAML documents
    pub task_catalog_dir: PathBuf,
    pub docker_binary: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gpu_device_ids: vec![0],
            gpu_device_difficulty: HashMap::new(),
            gpu_metrics_refresh_interval: 5,
            session_idle_timeout_seconds: 300,
            session_max_lifetime_seconds: 3600,
            session_queue_max_size: 5,
            monitor_interval: 30,
            default_task_timeout: 300,
            max_task_timeout: 1800,
            task_memory_limit: "16g".to_string(),
            task_cpu_quota: 100_000,
            model_cache_dir: PathBuf::from("/var/lib/gpud/models"),
            auto_fetch_models: true,
            file_service_url: "http://localhost:8100".to_string(),
            file_service_internal_key: String::new(),
            internal_api_key: String::new(),
            allowed_docker_images: Vec::new(),
            task_catalog_dir: PathBuf::from("config"),
            docker_binary: PathBuf::from("docker"),
        }
    }
}

impl Settings {
    /// Load settings from the process environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> GpudResult<Self> {
        let defaults = Settings::default();

        Ok(Settings {
            gpu_device_ids: match env_var("GPU_DEVICE_IDS") {
                Some(raw) => parse_id_list(&raw)?,
                None => defaults.gpu_device_ids,
            },
            gpu_device_difficulty: match env_var("GPU_DEVICE_DIFFICULTY") {
                Some(raw) => parse_difficulty_map(&raw)?,
                None => defaults.gpu_device_difficulty,
            },
            gpu_metrics_refresh_interval: env_parse(
                "GPU_METRICS_REFRESH_INTERVAL",
                defaults.gpu_metrics_refresh_interval,
            )?,
            session_idle_timeout_seconds: env_parse(
                "SESSION_IDLE_TIMEOUT_SECONDS",
                defaults.session_idle_timeout_seconds,
            )?,
            session_max_lifetime_seconds: env_parse(
                "SESSION_MAX_LIFETIME_SECONDS",
                defaults.session_max_lifetime_seconds,
            )?,
            session_queue_max_size: env_parse(
                "SESSION_QUEUE_MAX_SIZE",
                defaults.session_queue_max_size,
            )?,
            monitor_interval: env_parse("MONITOR_INTERVAL", defaults.monitor_interval)?,
            default_task_timeout: env_parse("DEFAULT_TASK_TIMEOUT", defaults.default_task_timeout)?,
            max_task_timeout: env_parse("MAX_TASK_TIMEOUT", defaults.max_task_timeout)?,
            task_memory_limit: env_var("TASK_MEMORY_LIMIT")
                .unwrap_or(defaults.task_memory_limit),
            task_cpu_quota: env_parse("TASK_CPU_QUOTA", defaults.task_cpu_quota)?,
            model_cache_dir: env_var("MODEL_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_cache_dir),
            auto_fetch_models: match env_var("AUTO_FETCH_MODELS") {
                Some(raw) => parse_bool("AUTO_FETCH_MODELS", &raw)?,
                None => defaults.auto_fetch_models,
            },
            file_service_url: env_var("FILE_SERVICE_URL").unwrap_or(defaults.file_service_url),
            file_service_internal_key: env_var("FILE_SERVICE_INTERNAL_KEY")
                .unwrap_or(defaults.file_service_internal_key),
            internal_api_key: env_var("INTERNAL_API_KEY").unwrap_or(defaults.internal_api_key),
            allowed_docker_images: match env_var("ALLOWED_DOCKER_IMAGES") {
                Some(raw) => parse_string_list(&raw),
                None => defaults.allowed_docker_images,
            },
            task_catalog_dir: env_var("TASK_CATALOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.task_catalog_dir),
            docker_binary: env_var("DOCKER_BINARY")
                .map(PathBuf::from)
                .unwrap_or(defaults.docker_binary),
        })
    }

    /// Difficulty class for a device; devices absent from the map are low.
    pub fn difficulty_for(&self, device_id: u32) -> Difficulty {
        self.gpu_device_difficulty
            .get(&device_id)
            .copied()
            .unwrap_or(Difficulty::Low)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> GpudResult<T> {
    match env_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| GpudError::Config(format!("invalid value for {}: {}", key, raw))),
        None => Ok(default),
    }
}

/// Parse `"0,1,2"` into device indices.
pub fn parse_id_list(raw: &str) -> GpudResult<Vec<u32>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse()
                .map_err(|_| GpudError::Config(format!("invalid GPU device id: {}", part.trim())))
        })
        .collect()
}

/// Parse `"0:low,1:high"` into a device→difficulty map.
pub fn parse_difficulty_map(raw: &str) -> GpudResult<HashMap<u32, Difficulty>> {
    let mut map = HashMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (id, class) = pair.split_once(':').ok_or_else(|| {
            GpudError::Config(format!("invalid GPU difficulty pair: {}", pair))
        })?;
        let id = id
            .trim()
            .parse()
            .map_err(|_| GpudError::Config(format!("invalid GPU device id: {}", id.trim())))?;
        map.insert(id, class.parse()?);
    }
    Ok(map)
}

fn parse_bool(key: &str, raw: &str) -> GpudResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(GpudError::Config(format!(
            "invalid boolean for {}: {}",
            key, other
        ))),
    }
}

fn parse_string_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.session_queue_max_size, 5);
        assert_eq!(settings.monitor_interval, 30);
        assert_eq!(settings.max_task_timeout, 1800);
        assert_eq!(settings.difficulty_for(7), Difficulty::Low);
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("0,1, 2").unwrap(), vec![0, 1, 2]);
        assert!(parse_id_list("0,x").is_err());
    }

    #[test]
    fn test_parse_difficulty_map() {
        let map = parse_difficulty_map("0:low, 1:high").unwrap();
        assert_eq!(map[&0], Difficulty::Low);
        assert_eq!(map[&1], Difficulty::High);

        assert!(parse_difficulty_map("0=low").is_err());
        assert!(parse_difficulty_map("0:medium").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(parse_bool("X", "ON").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_parse_string_list() {
        assert_eq!(
            parse_string_list("loading-worker, llm-worker,"),
            vec!["loading-worker".to_string(), "llm-worker".to_string()]
        );
    }
}
