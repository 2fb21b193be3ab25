use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, info_span, warn};

use crate::association::AssociationResolver;
use crate::cancel::Cancelled;
use crate::context::RunContext;
use crate::entity::{EntityKind, NamedEntity, TargetOrigin, TargetSet};
use crate::identity::{OwnerCheck, OwnerIdentity, verify_known};
use crate::listing::list_entities;
use crate::selector::{FilterSelector, Selector};
use crate::settings::{ResolvedTargets, TransferSettings, load_settings, save_settings};
use crate::targets::{RunMode, TargetRequest, build_target_set};
use crate::transfer::{TransferPlan, TransferReport, transfer};

pub use crate::cancel::EXIT_CANCELLED;

pub const EXIT_PARTIAL_FAILURE: i32 = 2;

#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub owner: Option<String>,
    pub mode: RunMode,
    pub groups: Vec<String>,
    pub containers: Vec<String>,
    pub recursive: bool,
    pub dry_run: bool,
    pub assume_yes: bool,
    pub interactive: bool,
    pub save_resolved: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RunStatus {
    Completed { targets: usize, failures: usize },
    NothingToDo,
    Declined,
    Cancelled,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Completed { failures, .. } if *failures > 0 => EXIT_PARTIAL_FAILURE,
            RunStatus::Cancelled => EXIT_CANCELLED,
            _ => 0,
        }
    }
}

type Confirm<'a> = Box<dyn FnMut(&str) -> anyhow::Result<bool> + 'a>;

pub struct Orchestrator<'a> {
    ctx: RunContext,
    settings: TransferSettings,
    options: RunOptions,
    selector: Box<dyn Selector + 'a>,
    confirm: Confirm<'a>,
    config_dir: Option<PathBuf>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        ctx: RunContext,
        settings: TransferSettings,
        options: RunOptions,
        selector: Box<dyn Selector + 'a>,
        confirm: Confirm<'a>,
    ) -> Self {
        Self {
            ctx,
            settings,
            options,
            selector,
            confirm,
            config_dir: None,
        }
    }

    /// Where `--save-resolved` and `resolve` persist the folder list.
    pub fn with_config_dir(mut self, config_dir: Option<PathBuf>) -> Self {
        self.config_dir = config_dir;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn run(&mut self) -> anyhow::Result<RunStatus> {
        let span = info_span!("run", run_id = %self.ctx.run_id, mode = ?self.options.mode);
        let _entered = span.enter();

        let owner = self.owner()?;
        self.check_owner(&owner)?;

        let (groups, targets) = match self.build_targets() {
            Ok(built) => built,
            Err(err) if err.downcast_ref::<Cancelled>().is_some() => {
                return Ok(RunStatus::Cancelled);
            }
            Err(err) => return Err(err),
        };
        if targets.is_empty() {
            println!("Nothing to do: no shared folders matched the selection.");
            return Ok(RunStatus::NothingToDo);
        }
        if self.options.save_resolved && self.options.mode == RunMode::GroupDriven {
            self.persist_resolved(&groups, &targets)?;
        }

        println!(
            "{} shared folder(s) will be transferred to {owner}{}:",
            targets.len(),
            if self.options.dry_run { " (dry run)" } else { "" }
        );
        for target in targets.iter() {
            println!("  - {target}");
        }
        if self.needs_confirmation() {
            let prompt = format!("Transfer ownership of {} folder(s) to {owner}?", targets.len());
            let cancel = self.ctx.cancel.clone();
            let Ok(approved) = cancel.prompt(|| (self.confirm)(&prompt)) else {
                return Ok(RunStatus::Cancelled);
            };
            if !approved? {
                println!("Aborted; no changes were made.");
                return Ok(RunStatus::Declined);
            }
        }

        let plan = TransferPlan {
            owner,
            recursive: self.options.recursive,
            dry_run: self.options.dry_run,
        };
        let report = match transfer(&mut self.ctx, &targets, &plan) {
            Ok(report) => report,
            Err(Cancelled) => return Ok(RunStatus::Cancelled),
        };
        print_summary(&report, targets.len());
        info!(counters = ?self.ctx.counters, "run finished");
        Ok(RunStatus::Completed {
            targets: targets.len(),
            failures: report.failures,
        })
    }

    /// Discovers folders for the selected teams and saves them for `saved` runs.
    pub fn resolve_and_save(&mut self) -> anyhow::Result<Option<TargetSet>> {
        let span = info_span!("resolve", run_id = %self.ctx.run_id);
        let _entered = span.enter();
        self.options.mode = RunMode::GroupDriven;
        let (groups, targets) = match self.build_targets() {
            Ok(built) => built,
            Err(err) if err.downcast_ref::<Cancelled>().is_some() => return Ok(None),
            Err(err) => return Err(err),
        };
        self.persist_resolved(&groups, &targets)?;
        Ok(Some(targets))
    }

    fn owner(&self) -> anyhow::Result<OwnerIdentity> {
        let raw = self
            .options
            .owner
            .as_deref()
            .or(self.settings.run.owner.as_deref())
            .ok_or_else(|| anyhow::anyhow!("no new owner given; pass --owner or set run.owner"))?;
        OwnerIdentity::parse(raw)
    }

    fn check_owner(&mut self, owner: &OwnerIdentity) -> anyhow::Result<()> {
        match verify_known(&mut self.ctx, owner) {
            OwnerCheck::Known => Ok(()),
            OwnerCheck::Unknown if self.settings.run.require_known_owner => Err(anyhow::anyhow!(
                "{owner} was not found among vault users"
            )),
            OwnerCheck::Unknown => {
                warn!(owner = %owner, "new owner not found among vault users; continuing");
                Ok(())
            }
            OwnerCheck::Unverified => {
                warn!(owner = %owner, "new owner could not be verified; continuing");
                Ok(())
            }
        }
    }

    fn needs_confirmation(&self) -> bool {
        self.options.interactive && !self.options.assume_yes && !self.options.dry_run
    }

    fn build_targets(&mut self) -> anyhow::Result<(Vec<NamedEntity>, TargetSet)> {
        let stale_after_days = self.settings.run.stale_after_days;
        let mut request = TargetRequest {
            mode: self.options.mode,
            ..TargetRequest::default()
        };
        match self.options.mode {
            RunMode::GroupDriven => {
                let groups = list_entities(&mut self.ctx, EntityKind::Group)?;
                request.groups = self.choose(
                    "Select the teams whose shared folders should change owner:",
                    &groups,
                    self.options.groups.clone(),
                )?;
                if request.groups.is_empty() {
                    let empty = TargetSet::build(Vec::new(), TargetOrigin::Discovered);
                    return Ok((Vec::new(), empty));
                }
                if !self.options.containers.is_empty() {
                    let listing = list_entities(&mut self.ctx, EntityKind::Container)?;
                    request.containers = FilterSelector::new(self.options.containers.clone())
                        .choose_many("", &listing)?;
                    request.container_listing = Some(listing);
                }
            }
            RunMode::ExplicitContainers => {
                let listing = list_entities(&mut self.ctx, EntityKind::Container)?;
                request.containers = self.choose(
                    "Select the shared folders that should change owner:",
                    &listing,
                    self.options.containers.clone(),
                )?;
            }
            RunMode::PreResolved => {
                let saved = self.settings.resolved.clone().ok_or_else(|| {
                    anyhow::anyhow!("no saved folder list; run `resolve` first")
                })?;
                request.containers = saved.containers;
                request.captured_at = saved.captured_at;
            }
        }
        let groups = request.groups.clone();
        let mut resolver = AssociationResolver::new();
        let targets = build_target_set(&mut self.ctx, &mut resolver, request, stale_after_days)?;
        Ok((groups, targets))
    }

    fn choose(
        &mut self,
        prompt: &str,
        items: &[NamedEntity],
        filters: Vec<String>,
    ) -> anyhow::Result<Vec<NamedEntity>> {
        if !filters.is_empty() {
            return FilterSelector::new(filters).choose_many(prompt, items);
        }
        if self.options.interactive {
            let cancel = self.ctx.cancel.clone();
            return cancel.prompt(|| self.selector.choose_many(prompt, items))?;
        }
        Err(anyhow::anyhow!(
            "nothing selected; pass --group/--folder, set run.groups/run.containers, or run interactively"
        ))
    }

    fn persist_resolved(&self, groups: &[NamedEntity], targets: &TargetSet) -> anyhow::Result<()> {
        let mut stored = load_settings(self.config_dir.as_deref())?;
        stored.resolved = Some(ResolvedTargets {
            captured_at: Some(Utc::now()),
            groups: groups.to_vec(),
            containers: targets.entries().to_vec(),
        });
        let path = save_settings(self.config_dir.as_deref(), &stored)?;
        info!(path = %path.display(), count = targets.len(), "saved resolved folder list");
        Ok(())
    }
}

fn print_summary(report: &TransferReport, total: usize) {
    let failed: Vec<_> = report.failed_targets().collect();
    println!(
        "Processed {total} folder(s): {} succeeded, {} with failures ({} failed step(s)).",
        total - failed.len(),
        failed.len(),
        report.failures
    );
    for outcome in failed {
        println!(
            "  ! {} ({}): grant={:?} ownership={:?}",
            outcome.name, outcome.uid, outcome.grant, outcome.ownership
        );
    }
}
