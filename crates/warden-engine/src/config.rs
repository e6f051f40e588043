//! Composition-root configuration (C14): storage path, pool size, provider
//! selection for the classifier/executor roles, and the HTTP bind address.
//! Env-var-first, mirroring the per-crate `from_env()` constructors this
//! binary wires together; an optional YAML file supplies a base layer that
//! environment variables always override (§4.14, §10).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use warden_providers::{HttpProvider, Provider, SubprocessProvider};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub state_dir: PathBuf,
    pub pool_min: usize,
    pub pool_max: usize,
    pub bind_addr: String,
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let state_dir = std::env::var("WARDEN_STATE_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./.warden"));
        let pool_min = env_usize("WARDEN_DB_POOL_MIN", 2)?;
        let pool_max = env_usize("WARDEN_DB_POOL_MAX", 10)?;
        let bind_addr = std::env::var("WARDEN_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        Ok(Self { state_dir, pool_min, pool_max, bind_addr })
    }

    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("warden.db")
    }
}

/// Loads `path` as a flat YAML mapping of env-var name to value and sets
/// each one with `set_var`, but only for names not already present in the
/// process environment — a real operator override always wins over the
/// base file (§4.14: "environment variables taking precedence"). Missing
/// file is not an error; every setting can still come from the environment
/// alone.
pub fn load_yaml_base_layer(path: &Path) -> anyhow::Result<()> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("failed to read config file {}", path.display())),
    };
    let values: HashMap<String, String> =
        serde_yaml::from_str(&raw).with_context(|| format!("failed to parse config file {}", path.display()))?;
    for (key, value) in values {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(key, value);
        }
    }
    Ok(())
}

fn env_usize(name: &str, default: usize) -> anyhow::Result<usize> {
    match std::env::var(name) {
        Ok(v) => v.parse().map_err(|_| anyhow::anyhow!("{name} must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}

/// Builds the provider bound to one role (`classifier` or `executor`).
/// Selection is by `WARDEN_<ROLE>_KIND` ∈ {`http`, `subprocess`}, per §6.4
/// ("A subprocess-CLI adapter is also supported"). Defaults to `http`.
pub fn build_provider(role: &str) -> anyhow::Result<Arc<dyn Provider>> {
    let role_upper = role.to_uppercase();
    let kind = std::env::var(format!("WARDEN_{role_upper}_KIND")).unwrap_or_else(|_| "http".to_string());

    match kind.as_str() {
        "http" => {
            let base_url = std::env::var(format!("WARDEN_{role_upper}_BASE_URL"))
                .with_context(|| format!("WARDEN_{role_upper}_BASE_URL not set"))?;
            let model = std::env::var(format!("WARDEN_{role_upper}_MODEL"))
                .with_context(|| format!("WARDEN_{role_upper}_MODEL not set"))?;
            let api_key = std::env::var(format!("WARDEN_{role_upper}_API_KEY")).ok();
            Ok(Arc::new(HttpProvider::new(role, base_url, api_key, model)))
        }
        "subprocess" => {
            let binary = std::env::var(format!("WARDEN_{role_upper}_BINARY")).unwrap_or_else(|_| "claude".to_string());
            let extra_args = std::env::var(format!("WARDEN_{role_upper}_ARGS"))
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            Ok(Arc::new(SubprocessProvider::new(role, binary, extra_args)))
        }
        other => bail!("unknown provider kind `{other}` for role `{role}` (expected `http` or `subprocess`)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_unset() {
        std::env::remove_var("WARDEN_STATE_DIR");
        std::env::remove_var("WARDEN_BIND_ADDR");
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.state_dir, PathBuf::from("./.warden"));
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
    }

    #[test]
    fn build_provider_rejects_unknown_kind() {
        std::env::set_var("WARDEN_CLASSIFIER_KIND", "carrier-pigeon");
        let result = build_provider("classifier");
        std::env::remove_var("WARDEN_CLASSIFIER_KIND");
        assert!(result.is_err());
    }

    #[test]
    fn build_provider_requires_base_url_for_http_kind() {
        std::env::remove_var("WARDEN_EXECUTOR_KIND");
        std::env::remove_var("WARDEN_EXECUTOR_BASE_URL");
        let result = build_provider("executor");
        assert!(result.is_err());
    }

    #[test]
    fn yaml_base_layer_never_overrides_a_set_env_var() {
        std::env::remove_var("WARDEN_YAML_TEST_UNSET");
        std::env::set_var("WARDEN_YAML_TEST_SET", "from-env");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "WARDEN_YAML_TEST_SET: from-file\nWARDEN_YAML_TEST_UNSET: from-file\n").unwrap();

        load_yaml_base_layer(&path).unwrap();

        assert_eq!(std::env::var("WARDEN_YAML_TEST_SET").unwrap(), "from-env");
        assert_eq!(std::env::var("WARDEN_YAML_TEST_UNSET").unwrap(), "from-file");
        std::env::remove_var("WARDEN_YAML_TEST_SET");
        std::env::remove_var("WARDEN_YAML_TEST_UNSET");
    }

    #[test]
    fn yaml_base_layer_missing_file_is_not_an_error() {
        let result = load_yaml_base_layer(Path::new("/nonexistent/warden-config.yaml"));
        assert!(result.is_ok());
    }
}
