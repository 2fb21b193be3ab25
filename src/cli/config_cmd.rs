use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::identity::OwnerIdentity;
use crate::settings::{TransferSettings, save_settings, settings_path};
use crate::targets::{RunMode, Staleness};

#[derive(Parser)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Subcommand)]
enum ConfigSubcommand {
    Show(ConfigShowArgs),
    Path(ConfigPathArgs),
    Set(ConfigSetArgs),
    ClearResolved(ConfigClearResolvedArgs),
}

#[derive(Parser)]
#[command(
    about = "Show the effective settings.",
    long_about = "Prints the persisted settings merged with defaults, including the saved folder list summary."
)]
pub struct ConfigShowArgs {}

#[derive(Parser)]
#[command(about = "Print the settings file location.")]
pub struct ConfigPathArgs {}

#[derive(Parser)]
#[command(
    about = "Persist run defaults.",
    long_about = "Updates settings.yaml; options not given keep their current value.",
    after_help = "Main options:\n  --owner <EMAIL>\n  --mode <groups|folders|saved>\n\nOptional options:\n  --group <NAME|UID> (repeatable, replaces the list)\n  --folder <NAME|UID> (repeatable, replaces the list)\n  --recursive <true|false>\n  --tool-path <PATH>\n  --timeout-secs <SECS>\n  --require-known-owner <true|false>"
)]
pub struct ConfigSetArgs {
    #[arg(long)]
    owner: Option<String>,
    #[arg(long, value_enum)]
    mode: Option<RunMode>,
    #[arg(long = "group")]
    groups: Vec<String>,
    #[arg(long = "folder")]
    folders: Vec<String>,
    #[arg(long)]
    recursive: Option<bool>,
    #[arg(long)]
    tool_path: Option<PathBuf>,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long)]
    require_known_owner: Option<bool>,
}

#[derive(Parser)]
#[command(about = "Forget the folder list saved by `resolve`.")]
pub struct ConfigClearResolvedArgs {}

impl ConfigCommand {
    pub fn run(self, dir: Option<&Path>, settings: TransferSettings) -> anyhow::Result<()> {
        match self.command {
            ConfigSubcommand::Show(args) => args.run(settings),
            ConfigSubcommand::Path(args) => args.run(dir),
            ConfigSubcommand::Set(args) => args.run(dir, settings).map(|_| ()),
            ConfigSubcommand::ClearResolved(args) => args.run(dir, settings).map(|_| ()),
        }
    }
}

impl ConfigShowArgs {
    pub fn run(self, settings: TransferSettings) -> anyhow::Result<()> {
        let mut shown = settings.clone();
        let saved = shown.resolved.take();
        print!("{}", serde_yaml_bw::to_string(&shown)?);
        match saved {
            None => println!("resolved: (none)"),
            Some(saved) => {
                println!(
                    "resolved: {} folder(s) from {} team(s)",
                    saved.containers.len(),
                    saved.groups.len()
                );
                let staleness = Staleness::assess(
                    saved.captured_at,
                    chrono::Utc::now(),
                    settings.run.stale_after_days,
                );
                println!("  {}", staleness.describe());
            }
        }
        Ok(())
    }
}

impl ConfigPathArgs {
    pub fn run(self, dir: Option<&Path>) -> anyhow::Result<()> {
        println!("{}", settings_path(dir)?.display());
        Ok(())
    }
}

impl ConfigSetArgs {
    pub fn run(
        self,
        dir: Option<&Path>,
        mut settings: TransferSettings,
    ) -> anyhow::Result<TransferSettings> {
        if let Some(owner) = self.owner {
            settings.run.owner = Some(OwnerIdentity::parse(&owner)?.as_str().to_string());
        }
        if let Some(mode) = self.mode {
            settings.run.mode = mode;
        }
        if !self.groups.is_empty() {
            settings.run.groups = self.groups;
        }
        if !self.folders.is_empty() {
            settings.run.containers = self.folders;
        }
        if let Some(recursive) = self.recursive {
            settings.run.recursive = recursive;
        }
        if let Some(path) = self.tool_path {
            settings.tool.path = Some(path);
        }
        if let Some(timeout_secs) = self.timeout_secs {
            settings.tool.timeout_secs = timeout_secs;
        }
        if let Some(require) = self.require_known_owner {
            settings.run.require_known_owner = require;
        }
        let path = save_settings(dir, &settings)?;
        println!("settings saved: {}", path.display());
        Ok(settings)
    }
}

impl ConfigClearResolvedArgs {
    pub fn run(
        self,
        dir: Option<&Path>,
        mut settings: TransferSettings,
    ) -> anyhow::Result<TransferSettings> {
        if settings.resolved.take().is_none() {
            println!("resolved: (none)");
            return Ok(settings);
        }
        save_settings(dir, &settings)?;
        println!("resolved: cleared");
        Ok(settings)
    }
}
