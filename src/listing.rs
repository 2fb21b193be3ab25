use tracing::{debug, info, warn};

use crate::cancel::Cancelled;
use crate::context::RunContext;
use crate::entity::{EntityKind, NamedEntity};
use crate::invoker::{CommandLine, InvokeError};
use crate::normalize::{NormalizeStats, normalize};

/// Lists groups or containers, falling through the configured command names
/// until one yields entities. Deployments disagree on which name exists.
pub fn list_entities(ctx: &mut RunContext, kind: EntityKind) -> anyhow::Result<Vec<NamedEntity>> {
    let candidates = match kind {
        EntityKind::Group => ctx.commands.group_listing.clone(),
        EntityKind::Container => ctx.commands.container_listing.clone(),
    };
    if candidates.is_empty() {
        return Err(anyhow::anyhow!(
            "no {} listing command configured",
            kind.label()
        ));
    }

    let mut failures = Vec::new();
    for raw in &candidates {
        let command = CommandLine::parse(raw)?;
        let invocation = match ctx.invoke(&command, true) {
            Ok(invocation) => invocation,
            Err(InvokeError::Cancelled) => return Err(Cancelled.into()),
            Err(err) => {
                warn!(command = %command, error = %err, "listing command failed; trying next");
                failures.push(format!("{command}: {err}"));
                continue;
            }
        };
        let mut stats = NormalizeStats::default();
        let entities = match normalize(&invocation.output, kind, &ctx.layout, &mut stats) {
            Ok(entities) => entities,
            Err(err) => {
                warn!(command = %command, error = %err, "listing output unusable; trying next");
                ctx.counters.skipped_entities += stats.skipped;
                failures.push(format!("{command}: {err}"));
                continue;
            }
        };
        ctx.counters.skipped_entities += stats.skipped;
        if entities.is_empty() {
            debug!(command = %command, "listing returned nothing; trying next");
            continue;
        }
        info!(
            command = %command,
            count = entities.len(),
            skipped = stats.skipped,
            "listed {}s",
            kind.label()
        );
        return Ok(entities);
    }

    if failures.len() == candidates.len() {
        return Err(anyhow::anyhow!(
            "every {} listing command failed:\n  {}",
            kind.label(),
            failures.join("\n  ")
        ));
    }
    Ok(Vec::new())
}
