//! Per-folder grant and ownership steps. Each step runs regardless of the other.

use tracing::{info, info_span, warn};

use crate::cancel::Cancelled;
use crate::context::RunContext;
use crate::entity::{NamedEntity, StepOutcome, TargetSet, TransferOutcome};
use crate::identity::OwnerIdentity;
use crate::invoker::{CommandLine, InvokeError};

#[derive(Clone, Debug)]
pub struct TransferPlan {
    pub owner: OwnerIdentity,
    pub recursive: bool,
    pub dry_run: bool,
}

#[derive(Clone, Debug, Default)]
pub struct TransferReport {
    pub outcomes: Vec<TransferOutcome>,
    /// Failed grant or ownership steps across all targets.
    pub failures: usize,
}

impl TransferReport {
    pub fn failed_targets(&self) -> impl Iterator<Item = &TransferOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.failed_steps() > 0)
    }
}

pub fn grant_command(
    ctx: &RunContext,
    plan: &TransferPlan,
    target: &NamedEntity,
) -> anyhow::Result<CommandLine> {
    Ok(CommandLine::parse(&ctx.commands.grant)?
        .args(["--action", "grant", "--email"])
        .arg(plan.owner.as_str())
        .args(["--manage-records", "on", "--manage-users", "on"])
        .arg(target.uid.clone()))
}

pub fn ownership_command(
    ctx: &RunContext,
    plan: &TransferPlan,
    target: &NamedEntity,
) -> anyhow::Result<CommandLine> {
    let mut command = CommandLine::parse(&ctx.commands.transfer)?
        .args(["--action", "owner", "--email"])
        .arg(plan.owner.as_str())
        .arg("--force");
    if plan.recursive {
        command = command.arg("--recursive");
    }
    if plan.dry_run {
        command = command.arg("--dry-run");
    }
    Ok(command.arg(target.uid.clone()))
}

pub fn transfer(
    ctx: &mut RunContext,
    targets: &TargetSet,
    plan: &TransferPlan,
) -> Result<TransferReport, Cancelled> {
    let span = info_span!("transfer", owner = %plan.owner, dry_run = plan.dry_run);
    let _entered = span.enter();
    let mut report = TransferReport::default();

    let result = transfer_each(ctx, targets, plan, &mut report);
    ctx.counters.failed_actions += report.failures;
    if let Err(cancelled) = result {
        warn!(
            completed = report.outcomes.len(),
            targets = targets.len(),
            failures = report.failures,
            "transfer cancelled; remaining folders untouched"
        );
        return Err(cancelled);
    }
    info!(
        targets = targets.len(),
        failures = report.failures,
        "ownership transfer finished"
    );
    Ok(report)
}

fn transfer_each(
    ctx: &mut RunContext,
    targets: &TargetSet,
    plan: &TransferPlan,
    report: &mut TransferReport,
) -> Result<(), Cancelled> {
    let total = targets.len();
    for (index, target) in targets.iter().enumerate() {
        info!("[{}/{}] {}", index + 1, total, target);

        let grant = if plan.dry_run {
            info!(uid = %target.uid, "dry run: skipping admin grant");
            StepOutcome::Skipped
        } else {
            ctx.cancel.check()?;
            let command = grant_command(ctx, plan, target);
            run_step(ctx, "grant", command, target)?
        };

        ctx.cancel.check()?;
        let command = ownership_command(ctx, plan, target);
        let ownership = run_step(ctx, "ownership", command, target)?;

        let outcome = TransferOutcome {
            uid: target.uid.clone(),
            name: target.name.clone(),
            grant,
            ownership,
        };
        report.failures += outcome.failed_steps();
        report.outcomes.push(outcome);
    }
    Ok(())
}

fn run_step(
    ctx: &mut RunContext,
    step: &'static str,
    command: anyhow::Result<CommandLine>,
    target: &NamedEntity,
) -> Result<StepOutcome, Cancelled> {
    let command = match command {
        Ok(command) => command,
        Err(err) => {
            warn!(step, uid = %target.uid, error = %err, "cannot build command");
            return Ok(StepOutcome::Failed(err.to_string()));
        }
    };
    match ctx.invoke(&command, false) {
        Ok(_) => Ok(StepOutcome::Succeeded),
        Err(InvokeError::Cancelled) => Err(Cancelled),
        Err(err) => {
            warn!(step, uid = %target.uid, name = %target.name, error = %err, "step failed");
            Ok(StepOutcome::Failed(err.to_string()))
        }
    }
}
