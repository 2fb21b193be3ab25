use std::{
    io::{self, BufReader, IsTerminal},
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use crate::bin_resolver::{self, ResolveCtx};
use crate::cancel::CancelFlag;
use crate::context::RunContext;
use crate::entity::EntityKind;
use crate::listing::list_entities;
use crate::logging;
use crate::orchestrator::{EXIT_CANCELLED, Orchestrator, RunOptions};
use crate::selector::{ConsoleSelector, confirm};
use crate::settings::{self, TransferSettings};
use crate::targets::RunMode;

mod config_cmd;

use config_cmd::ConfigCommand;

#[derive(Parser)]
#[command(name = "vault-owner-transfer")]
#[command(
    about = "Transfer shared folder ownership in bulk through the vault admin CLI",
    version
)]
pub struct Cli {
    #[arg(long, global = true, help = "Directory holding settings.yaml.")]
    config_dir: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = ArgAction::Count,
        help = "Increase log detail (-v debug, -vv trace)."
    )]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Grant admin rights and transfer ownership on the selected shared folders")]
    Run(RunArgs),
    #[command(about = "Discover the shared folders of the selected teams and save the list")]
    Resolve(ResolveArgs),
    #[command(about = "List teams or shared folders as the tool reports them")]
    List(ListArgs),
    #[command(about = "Inspect or change persisted settings")]
    Config(ConfigCommand),
}

#[derive(Parser)]
struct ToolArgs {
    #[arg(long, help = "Admin tool executable (overrides tool.path).")]
    tool_path: Option<PathBuf>,
    #[arg(long, help = "Per-command timeout in seconds; 0 disables.")]
    timeout_secs: Option<u64>,
}

#[derive(Parser)]
#[command(
    after_help = "Main options:\n  --owner <EMAIL>\n  --mode <groups|folders|saved>\n\nOptional options:\n  --group <NAME|UID> (repeatable)\n  --folder <NAME|UID> (repeatable)\n  --no-recursive\n  --dry-run\n  --yes\n  --non-interactive\n  --save-resolved"
)]
struct RunArgs {
    #[arg(long, help = "E-mail of the account receiving ownership.")]
    owner: Option<String>,
    #[arg(long, value_enum)]
    mode: Option<RunMode>,
    #[arg(long = "group", help = "Team name or UID to discover folders for.")]
    groups: Vec<String>,
    #[arg(long = "folder", help = "Shared folder name or UID to transfer.")]
    folders: Vec<String>,
    #[arg(long, help = "Do not descend into sub-folders.")]
    no_recursive: bool,
    #[arg(long, help = "Preview the ownership change without applying it.")]
    dry_run: bool,
    #[arg(short = 'y', long, help = "Skip the confirmation prompt.")]
    yes: bool,
    #[arg(long, help = "Never prompt; selections must come from flags or settings.")]
    non_interactive: bool,
    #[arg(long, help = "Save the discovered folder list for later `--mode saved` runs.")]
    save_resolved: bool,
    #[command(flatten)]
    tool: ToolArgs,
}

#[derive(Parser)]
struct ResolveArgs {
    #[arg(long = "group", help = "Team name or UID to discover folders for.")]
    groups: Vec<String>,
    #[arg(long, help = "Never prompt; teams must come from flags or settings.")]
    non_interactive: bool,
    #[command(flatten)]
    tool: ToolArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ListKind {
    Groups,
    Folders,
}

#[derive(Parser)]
struct ListArgs {
    #[arg(value_enum)]
    kind: ListKind,
    #[arg(long, help = "Print JSON instead of a table.")]
    json: bool,
    #[command(flatten)]
    tool: ToolArgs,
}

impl Cli {
    /// Runs the selected command and returns the process exit status.
    pub fn run(self) -> anyhow::Result<i32> {
        logging::init_tracing(self.verbose);
        let dir = self.config_dir.as_deref();
        let settings = settings::load_settings(dir)?;
        match self.command {
            Command::Run(args) => args.run(dir, settings),
            Command::Resolve(args) => args.run(dir, settings),
            Command::List(args) => args.run(dir, settings),
            Command::Config(command) => command.run(dir, settings).map(|_| 0),
        }
    }
}

impl ToolArgs {
    fn apply(&self, settings: &mut TransferSettings) {
        if let Some(path) = &self.tool_path {
            settings.tool.path = Some(path.clone());
        }
        if let Some(timeout_secs) = self.timeout_secs {
            settings.tool.timeout_secs = timeout_secs;
        }
    }

    /// Resolves the tool and wires the run context. Any failure here is fatal
    /// and happens before a single command reaches the vault.
    fn prepare(
        &self,
        dir: Option<&Path>,
        settings: &mut TransferSettings,
    ) -> anyhow::Result<RunContext> {
        self.apply(settings);
        let ctx = ResolveCtx {
            config_dir: settings::config_dir(dir)?,
            explicit_path: settings.tool.path.clone(),
        };
        let program = bin_resolver::resolve_binary(&settings.tool.name, &ctx)?;
        let cancel = CancelFlag::new();
        cancel.install_ctrlc()?;
        Ok(RunContext::from_settings(settings, &program, cancel)
            .with_progress(io::stderr().is_terminal()))
    }
}

fn interactive(non_interactive: bool) -> bool {
    !non_interactive && io::stdin().is_terminal() && io::stdout().is_terminal()
}

fn console_confirm(prompt: &str) -> anyhow::Result<bool> {
    confirm(&mut io::stdin().lock(), &mut io::stdout(), prompt)
}

impl RunArgs {
    fn run(self, dir: Option<&Path>, mut settings: TransferSettings) -> anyhow::Result<i32> {
        let ctx = self.tool.prepare(dir, &mut settings)?;
        let defaults = settings.run.clone();
        let options = RunOptions {
            owner: self.owner.or(defaults.owner),
            mode: self.mode.unwrap_or(defaults.mode),
            groups: non_empty_or(self.groups, defaults.groups),
            containers: non_empty_or(self.folders, defaults.containers),
            recursive: defaults.recursive && !self.no_recursive,
            dry_run: self.dry_run,
            assume_yes: self.yes,
            interactive: interactive(self.non_interactive),
            save_resolved: self.save_resolved,
        };
        let selector = ConsoleSelector::new(BufReader::new(io::stdin()), io::stdout());
        let mut orchestrator = Orchestrator::new(
            ctx,
            settings,
            options,
            Box::new(selector),
            Box::new(console_confirm),
        )
        .with_config_dir(dir.map(Path::to_path_buf));
        let status = orchestrator.run().context("ownership transfer run failed")?;
        Ok(status.exit_code())
    }
}

impl ResolveArgs {
    fn run(self, dir: Option<&Path>, mut settings: TransferSettings) -> anyhow::Result<i32> {
        let ctx = self.tool.prepare(dir, &mut settings)?;
        let options = RunOptions {
            mode: RunMode::GroupDriven,
            groups: non_empty_or(self.groups, settings.run.groups.clone()),
            interactive: interactive(self.non_interactive),
            ..RunOptions::default()
        };
        let selector = ConsoleSelector::new(BufReader::new(io::stdin()), io::stdout());
        let mut orchestrator = Orchestrator::new(
            ctx,
            settings,
            options,
            Box::new(selector),
            Box::new(console_confirm),
        )
        .with_config_dir(dir.map(Path::to_path_buf));
        match orchestrator.resolve_and_save()? {
            Some(targets) => {
                println!("Saved {} shared folder(s):", targets.len());
                for target in targets.iter() {
                    println!("  - {target}");
                }
                Ok(0)
            }
            None => Ok(EXIT_CANCELLED),
        }
    }
}

impl ListArgs {
    fn run(self, dir: Option<&Path>, mut settings: TransferSettings) -> anyhow::Result<i32> {
        let mut ctx = self.tool.prepare(dir, &mut settings)?;
        let kind = match self.kind {
            ListKind::Groups => EntityKind::Group,
            ListKind::Folders => EntityKind::Container,
        };
        let entities = list_entities(&mut ctx, kind)?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&entities)?);
            return Ok(0);
        }
        if entities.is_empty() {
            println!("No {}s found.", kind.label());
            return Ok(0);
        }
        let width = entities
            .iter()
            .map(|entity| entity.uid.len())
            .max()
            .unwrap_or(0);
        for entity in &entities {
            println!("{:<width$}  {}", entity.uid, entity.name);
        }
        Ok(0)
    }
}

fn non_empty_or(primary: Vec<String>, fallback: Vec<String>) -> Vec<String> {
    if primary.is_empty() { fallback } else { primary }
}
