use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use docrepo_store::StoreConfig;

use crate::queue::QueueConfig;

const DEFAULT_SUBDIR: &str = ".docrepo";

/// Application configuration: typed sections for the store, the background
/// queue and logging, plus a per-repository bag that each repository
/// deserializes into its own settings type.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Base directory for relative log paths. Normalized to an absolute path on load.
    #[serde(default)]
    pub home_dir: String,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
    /// Repository name → repository settings.
    #[serde(default)]
    pub repositories: HashMap<String, serde_json::Value>,
}

/// Logging configuration - maps subsystem names to their logging settings.
/// Key "default" is the catch-all for logs that don't match explicit subsystems.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/docrepo.log"; empty disables file output
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: "logs/docrepo.log".to_string(),
            file_level: "debug".to_string(),
            max_age_days: Some(7),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            home_dir: String::new(),
            store: StoreConfig::default(),
            queue: QueueConfig::default(),
            logging: Some(default_logging_config()),
            repositories: HashMap::new(),
        }
    }
}

/// Command line arguments that influence configuration.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub print_config: bool,
    pub verbose: u8,
    pub workers: Option<usize>,
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    /// Normalizes `home_dir` into an absolute path and creates the directory.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config: AppConfig = Self::figment(config_path.as_ref())
            .extract()
            .with_context(|| "Failed to extract config from figment".to_string())?;

        config.home_dir = normalize_home_dir(&config.home_dir)
            .context("Failed to resolve home_dir")?
            .to_string_lossy()
            .to_string();
        Ok(config)
    }

    /// The layered Figment behind [`AppConfig::load_layered`], for components
    /// that read their own sections.
    pub fn figment(config_path: &Path) -> figment::Figment {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        // Optional sections stay None unless YAML or ENV provide them.
        let base = AppConfig {
            logging: None,
            ..AppConfig::default()
        };

        Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path))
            // Example: DOCREPO__QUEUE__WORKERS=8 maps to queue.workers
            .merge(Env::prefixed("DOCREPO__").split("__"))
    }

    /// Load configuration from file or create with default values.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut c = Self::default();
                c.home_dir = normalize_home_dir(&c.home_dir)
                    .context("Failed to resolve home_dir (defaults)")?
                    .to_string_lossy()
                    .to_string();
                Ok(c)
            }
        }
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(workers) = args.workers {
            self.queue.workers = workers.max(1);
        }

        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            default_section.console_level = match args.verbose {
                0 => default_section.console_level.clone(),
                1 => "debug".to_string(),
                _ => "trace".to_string(),
            };
        }
    }

    /// Settings for one repository, deserialized from the `repositories` bag.
    pub fn repository_config<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.repositories
            .get(name)
            .map(|raw| {
                serde_json::from_value(raw.clone())
                    .with_context(|| format!("Invalid configuration for repository '{name}'"))
            })
            .transpose()
    }
}

/// Expand `~`, resolve relative paths against the working directory and
/// create the directory. Empty means `$HOME/.docrepo`.
fn normalize_home_dir(raw: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    let user_home = || dirs::home_dir().context("Cannot determine the user home directory");

    let path = if raw.is_empty() {
        user_home()?.join(DEFAULT_SUBDIR)
    } else if raw == "~" {
        user_home()?
    } else if let Some(rest) = raw.strip_prefix("~/") {
        user_home()?.join(rest)
    } else {
        let p = PathBuf::from(raw);
        if p.is_absolute() {
            p
        } else {
            std::env::current_dir()?.join(p)
        }
    };

    std::fs::create_dir_all(&path)
        .with_context(|| format!("Failed to create home_dir '{}'", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn yaml_path(s: &Path) -> String {
        s.to_string_lossy().replace('\\', "/")
    }

    #[test]
    fn test_default_config_structure() {
        let config = AppConfig::default();
        assert_eq!(config.home_dir, "");
        assert!(config.store.auto_provision);
        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.queue.capacity, 1024);
        let logging = config.logging.as_ref().unwrap();
        assert_eq!(logging["default"].file, "logs/docrepo.log");
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn test_load_layered_parses_sections() {
        let tmp = tempdir().unwrap();
        let home = tmp.path().join("home");
        let cfg_path = tmp.path().join("cfg.yaml");
        let yaml = format!(
            r#"
home_dir: "{}"
store:
  auto_provision: false
  containers:
    notes:
      max_item_count: 25
queue:
  workers: 2
  capacity: 16
  shutdown_timeout: 5s
logging:
  default:
    console_level: debug
    file: ""
repositories:
  notes:
    container_name: notes
    audit_enabled: false
"#,
            yaml_path(&home)
        );
        fs::write(&cfg_path, yaml).unwrap();

        let config = AppConfig::load_layered(&cfg_path).unwrap();
        assert!(Path::new(&config.home_dir).is_absolute());
        assert!(home.exists(), "home_dir must be created");
        assert!(!config.store.auto_provision);
        assert_eq!(config.store.max_item_count_for("notes"), 25);
        assert_eq!(config.queue.workers, 2);
        assert_eq!(config.queue.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.logging.unwrap()["default"].console_level, "debug");
        assert_eq!(config.repositories["notes"]["audit_enabled"], false);
    }

    #[test]
    fn test_minimal_yaml_leaves_optional_sections_empty() {
        let tmp = tempdir().unwrap();
        let cfg_path = tmp.path().join("cfg.yaml");
        fs::write(&cfg_path, format!("home_dir: \"{}\"\n", yaml_path(tmp.path()))).unwrap();

        let config = AppConfig::load_layered(&cfg_path).unwrap();
        assert!(config.logging.is_none());
        assert_eq!(config.store, StoreConfig::default());
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn test_unknown_top_level_field_is_rejected() {
        let tmp = tempdir().unwrap();
        let cfg_path = tmp.path().join("cfg.yaml");
        fs::write(&cfg_path, "server:\n  port: 1\n").unwrap();
        assert!(AppConfig::load_layered(&cfg_path).is_err());
    }

    #[test]
    fn test_cli_verbose_levels_matrix() {
        for (verbose, expected) in [(0, "info"), (1, "debug"), (2, "trace"), (3, "trace")] {
            let mut config = AppConfig::default();
            config.apply_cli_overrides(&CliArgs {
                verbose,
                ..CliArgs::default()
            });
            let logging = config.logging.as_ref().unwrap();
            assert_eq!(logging["default"].console_level, expected);
        }
    }

    #[test]
    fn test_cli_workers_override() {
        let mut config = AppConfig::default();
        config.apply_cli_overrides(&CliArgs {
            workers: Some(0),
            ..CliArgs::default()
        });
        assert_eq!(config.queue.workers, 1);
    }

    #[test]
    fn test_repository_config_bag() {
        #[derive(Deserialize)]
        struct Repo {
            container_name: String,
        }

        let mut config = AppConfig::default();
        config
            .repositories
            .insert("notes".into(), serde_json::json!({"container_name": "n"}));
        config
            .repositories
            .insert("broken".into(), serde_json::json!({"container_name": 5}));

        let repo: Repo = config.repository_config("notes").unwrap().unwrap();
        assert_eq!(repo.container_name, "n");
        assert!(config.repository_config::<Repo>("missing").unwrap().is_none());
        assert!(config.repository_config::<Repo>("broken").is_err());
    }

    #[test]
    fn test_to_yaml_roundtrip_basic() {
        let config = AppConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("store:"));
        assert!(yaml.contains("queue:"));

        let roundtrip: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(roundtrip.queue.workers, config.queue.workers);
    }
}
