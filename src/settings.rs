use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories_next::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::entity::NamedEntity;
use crate::invoker::StructuredFlag;
use crate::normalize::TextLayout;
use crate::targets::RunMode;

pub const CONFIG_DIR_ENV: &str = "VAULT_OWNER_TRANSFER_CONFIG_DIR";
const SETTINGS_FILE: &str = "settings.yaml";

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct TransferSettings {
    #[serde(default)]
    pub tool: ToolSettings,
    #[serde(default)]
    pub commands: CommandSettings,
    #[serde(default)]
    pub run: RunDefaults,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedTargets>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolSettings {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_tool_name")]
    pub name: String,
    #[serde(default)]
    pub base_args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_header_lines")]
    pub header_lines: usize,
    #[serde(default = "default_format_flag")]
    pub format_flag: String,
    #[serde(default = "default_format_value")]
    pub format_value: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            path: None,
            name: default_tool_name(),
            base_args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            header_lines: default_header_lines(),
            format_flag: default_format_flag(),
            format_value: default_format_value(),
        }
    }
}

impl ToolSettings {
    /// `None` when the timeout is disabled (`timeout_secs: 0`).
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn structured_flag(&self) -> StructuredFlag {
        StructuredFlag {
            name: self.format_flag.clone(),
            value: self.format_value.clone(),
        }
    }

    pub fn text_layout(&self) -> TextLayout {
        TextLayout {
            header_lines: self.header_lines,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CommandSettings {
    #[serde(default = "default_group_listing")]
    pub group_listing: Vec<String>,
    #[serde(default = "default_container_listing")]
    pub container_listing: Vec<String>,
    #[serde(default = "default_container_detail")]
    pub container_detail: String,
    #[serde(default = "default_grant")]
    pub grant: String,
    #[serde(default = "default_transfer")]
    pub transfer: String,
    #[serde(default = "default_user_listing")]
    pub user_listing: String,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            group_listing: default_group_listing(),
            container_listing: default_container_listing(),
            container_detail: default_container_detail(),
            grant: default_grant(),
            transfer: default_transfer(),
            user_listing: default_user_listing(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunDefaults {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub containers: Vec<String>,
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,
    #[serde(default)]
    pub require_known_owner: bool,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            owner: None,
            mode: RunMode::default(),
            recursive: true,
            groups: Vec::new(),
            containers: Vec::new(),
            stale_after_days: default_stale_after_days(),
            require_known_owner: false,
        }
    }
}

/// A container list captured by an earlier discovery pass.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResolvedTargets {
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub groups: Vec<NamedEntity>,
    #[serde(default)]
    pub containers: Vec<NamedEntity>,
}

fn default_tool_name() -> String {
    "keeper".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_header_lines() -> usize {
    1
}

fn default_format_flag() -> String {
    "--format".to_string()
}

fn default_format_value() -> String {
    "json".to_string()
}

fn default_group_listing() -> Vec<String> {
    vec!["list-team".to_string(), "team-list".to_string()]
}

fn default_container_listing() -> Vec<String> {
    vec!["list-sf".to_string(), "shared-folder-list".to_string()]
}

fn default_container_detail() -> String {
    "get".to_string()
}

fn default_grant() -> String {
    "share-folder".to_string()
}

fn default_transfer() -> String {
    "share-record".to_string()
}

fn default_user_listing() -> String {
    "enterprise-info --users".to_string()
}

fn default_true() -> bool {
    true
}

fn default_stale_after_days() -> i64 {
    7
}

/// Directory holding `settings.yaml`: explicit override, then the environment,
/// then the platform config directory.
pub fn config_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Ok(value) = std::env::var(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(value));
    }
    let dirs = ProjectDirs::from("", "vault-owner-transfer", "vault-owner-transfer")
        .ok_or_else(|| anyhow::anyhow!("unable to determine config directory"))?;
    Ok(dirs.config_dir().to_path_buf())
}

pub fn settings_path(explicit_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    Ok(config_dir(explicit_dir)?.join(SETTINGS_FILE))
}

pub fn load_settings(explicit_dir: Option<&Path>) -> anyhow::Result<TransferSettings> {
    let path = settings_path(explicit_dir)?;
    if !path.exists() {
        return Ok(TransferSettings::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    let settings: TransferSettings = serde_yaml_bw::from_str(&contents)
        .map_err(|err| anyhow::anyhow!("invalid settings file {}: {err}", path.display()))?;
    Ok(settings)
}

pub fn save_settings(
    explicit_dir: Option<&Path>,
    settings: &TransferSettings,
) -> anyhow::Result<PathBuf> {
    let path = settings_path(explicit_dir)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_yaml_bw::to_string(settings)?;
    std::fs::write(&path, contents)?;
    Ok(path)
}
