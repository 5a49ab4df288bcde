// Runner configuration: JSON file defaults overlaid with environment variables
use crate::error::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/runner.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub command: String,
    pub flags: Vec<String>,
    pub source_name: String,
    pub binary_name: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            command: "g++".to_string(),
            flags: vec!["-std=c++17".to_string()],
            source_name: "main.cpp".to_string(),
            binary_name: "main.out".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub compile_timeout_ms: u64,
    pub execution_timeout_ms: u64,
    /// Per stream; anything past this is drained and dropped
    pub max_output_bytes: usize,
    pub max_source_bytes: usize,
    pub max_input_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            compile_timeout_ms: 10_000,
            execution_timeout_ms: 10_000,
            max_output_bytes: 1024 * 1024,
            max_source_bytes: 1024 * 1024,
            max_input_bytes: 10 * 1024 * 1024,
        }
    }
}

impl LimitsConfig {
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Run the binary directly, outer timeout only
    None,
    /// Wrap the binary in coreutils `timeout` for the sandbox ceiling
    Timeout,
    /// Run the binary inside a throwaway Docker container
    Docker,
}

impl std::str::FromStr for IsolationMode {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(IsolationMode::None),
            "timeout" => Ok(IsolationMode::Timeout),
            "docker" => Ok(IsolationMode::Docker),
            other => Err(RunnerError::Config(format!(
                "unknown isolation mode '{}' (expected none, timeout or docker)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    pub mode: IsolationMode,
    pub sandbox_timeout_ms: u64,
    pub docker_image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f64,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            mode: IsolationMode::Timeout,
            sandbox_timeout_ms: 5_000,
            docker_image: "gcc:latest".to_string(),
            memory_limit_mb: 256,
            cpu_limit: 1.0,
        }
    }
}

impl IsolationConfig {
    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// When set, requests are forwarded here instead of run locally
    pub url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 20_000,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub port: u16,
    pub scratch_root: PathBuf,
    pub toolchain: ToolchainConfig,
    pub limits: LimitsConfig,
    pub isolation: IsolationConfig,
    pub remote: RemoteConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            scratch_root: std::env::temp_dir().join("cpp-runner"),
            toolchain: ToolchainConfig::default(),
            limits: LimitsConfig::default(),
            isolation: IsolationConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a JSON file; a missing file yields the defaults
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| {
            RunnerError::Config(format!("failed to read {}: {}", config_path.display(), e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            RunnerError::Config(format!("failed to parse {}: {}", config_path.display(), e))
        })
    }

    /// File from `CRUCIBLE_CONFIG` (or the default path), then env overrides
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("CRUCIBLE_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load(Path::new(&path))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values produced by `lookup` (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.port = parse_var("PORT", &port)?;
        }
        if let Some(root) = lookup("CRUCIBLE_SCRATCH_ROOT") {
            self.scratch_root = PathBuf::from(root);
        }
        if let Some(command) = lookup("CRUCIBLE_COMPILER") {
            self.toolchain.command = command;
        }
        if let Some(flags) = lookup("CRUCIBLE_COMPILER_FLAGS") {
            self.toolchain.flags = flags.split_whitespace().map(str::to_string).collect();
        }
        if let Some(ms) = lookup("CRUCIBLE_COMPILE_TIMEOUT_MS") {
            self.limits.compile_timeout_ms = parse_var("CRUCIBLE_COMPILE_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("CRUCIBLE_EXECUTION_TIMEOUT_MS") {
            self.limits.execution_timeout_ms = parse_var("CRUCIBLE_EXECUTION_TIMEOUT_MS", &ms)?;
        }
        if let Some(bytes) = lookup("CRUCIBLE_MAX_OUTPUT_BYTES") {
            self.limits.max_output_bytes = parse_var("CRUCIBLE_MAX_OUTPUT_BYTES", &bytes)?;
        }
        if let Some(bytes) = lookup("CRUCIBLE_MAX_SOURCE_BYTES") {
            self.limits.max_source_bytes = parse_var("CRUCIBLE_MAX_SOURCE_BYTES", &bytes)?;
        }
        if let Some(bytes) = lookup("CRUCIBLE_MAX_INPUT_BYTES") {
            self.limits.max_input_bytes = parse_var("CRUCIBLE_MAX_INPUT_BYTES", &bytes)?;
        }
        if let Some(mode) = lookup("CRUCIBLE_ISOLATION") {
            self.isolation.mode = mode.parse()?;
        }
        if let Some(ms) = lookup("CRUCIBLE_SANDBOX_TIMEOUT_MS") {
            self.isolation.sandbox_timeout_ms = parse_var("CRUCIBLE_SANDBOX_TIMEOUT_MS", &ms)?;
        }
        if let Some(image) = lookup("CRUCIBLE_DOCKER_IMAGE") {
            self.isolation.docker_image = image;
        }
        if let Some(mb) = lookup("CRUCIBLE_MEMORY_LIMIT_MB") {
            self.isolation.memory_limit_mb = parse_var("CRUCIBLE_MEMORY_LIMIT_MB", &mb)?;
        }
        if let Some(cpu) = lookup("CRUCIBLE_CPU_LIMIT") {
            self.isolation.cpu_limit = parse_var("CRUCIBLE_CPU_LIMIT", &cpu)?;
        }
        if let Some(url) = lookup("EXTERNAL_RUNNER_URL") {
            let url = url.trim().to_string();
            self.remote.url = if url.is_empty() { None } else { Some(url) };
        }
        if let Some(ms) = lookup("CRUCIBLE_REMOTE_TIMEOUT_MS") {
            self.remote.timeout_ms = parse_var("CRUCIBLE_REMOTE_TIMEOUT_MS", &ms)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.toolchain.command.trim().is_empty() {
            return Err(RunnerError::Config("compiler command is empty".to_string()));
        }
        if self.limits.compile_timeout_ms == 0 || self.limits.execution_timeout_ms == 0 {
            return Err(RunnerError::Config("timeouts must be greater than zero".to_string()));
        }
        if self.remote.url.is_some() && self.remote.timeout_ms == 0 {
            return Err(RunnerError::Config("remote timeout must be greater than zero".to_string()));
        }
        match self.isolation.mode {
            IsolationMode::None => {}
            IsolationMode::Timeout | IsolationMode::Docker => {
                if self.isolation.sandbox_timeout_ms == 0 {
                    return Err(RunnerError::Config(
                        "sandbox timeout must be greater than zero".to_string(),
                    ));
                }
            }
        }
        if self.isolation.mode == IsolationMode::Docker {
            if self.isolation.memory_limit_mb == 0 {
                return Err(RunnerError::Config("memory limit must be greater than zero".to_string()));
            }
            if self.isolation.cpu_limit <= 0.0 {
                return Err(RunnerError::Config("cpu limit must be greater than zero".to_string()));
            }
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RunnerError::Config(format!("invalid value for {}: '{}'", key, value)))
}

/// Render a duration in whole seconds when possible ("10"), else "2.5"
pub fn format_secs(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        (millis / 1000).to_string()
    } else {
        let secs = format!("{:.3}", duration.as_secs_f64());
        secs.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
