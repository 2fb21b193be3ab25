use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::cancel::Cancelled;
use crate::context::RunContext;
use crate::entity::{ContainerDetail, NamedEntity};
use crate::invoker::{CommandLine, InvokeError};
use crate::normalize::parse_detail;
use crate::progress::Progress;

#[derive(Default)]
pub struct AssociationResolver {
    details: HashMap<String, Option<ContainerDetail>>,
    fetched: usize,
}

impl AssociationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detail calls issued so far; failed fetches count once and are not retried.
    pub fn fetched(&self) -> usize {
        self.fetched
    }

    /// Returns the containers (in listing order, unique by UID) on which any
    /// selected group appears.
    pub fn resolve(
        &mut self,
        ctx: &mut RunContext,
        groups: &[NamedEntity],
        containers: &[NamedEntity],
    ) -> Result<Vec<NamedEntity>, Cancelled> {
        let total = groups.len() * containers.len();
        let mut progress = Progress::new("scanning shared folders", total, ctx.show_progress);
        let mut matched: HashSet<&str> = HashSet::new();
        let mut scanned = 0;

        for group in groups {
            for container in containers {
                scanned += 1;
                if matched.contains(container.uid.as_str()) {
                    progress.update(scanned);
                    continue;
                }
                ctx.cancel.check()?;
                let hit = self
                    .detail(ctx, container)?
                    .is_some_and(|detail| detail.matches_group(group));
                if hit {
                    debug!(group = %group, container = %container, "team holds permissions on folder");
                    matched.insert(container.uid.as_str());
                }
                progress.update(scanned);
            }
        }

        let mut seen = HashSet::new();
        let associated: Vec<NamedEntity> = containers
            .iter()
            .filter(|container| matched.contains(container.uid.as_str()))
            .filter(|container| seen.insert(container.uid.as_str()))
            .cloned()
            .collect();
        info!(
            groups = groups.len(),
            containers = containers.len(),
            associated = associated.len(),
            fetched = self.fetched,
            failures = ctx.counters.detail_failures,
            "association scan complete"
        );
        Ok(associated)
    }

    fn detail(
        &mut self,
        ctx: &mut RunContext,
        container: &NamedEntity,
    ) -> Result<Option<&ContainerDetail>, Cancelled> {
        if !self.details.contains_key(&container.uid) {
            let detail = fetch_detail(ctx, container)?;
            self.fetched += 1;
            if detail.is_none() {
                ctx.counters.detail_failures += 1;
            }
            self.details.insert(container.uid.clone(), detail);
        }
        Ok(self
            .details
            .get(&container.uid)
            .and_then(|detail| detail.as_ref()))
    }
}

fn fetch_detail(
    ctx: &mut RunContext,
    container: &NamedEntity,
) -> Result<Option<ContainerDetail>, Cancelled> {
    let command = match CommandLine::parse(&ctx.commands.container_detail) {
        Ok(command) => command.arg(container.uid.clone()),
        Err(err) => {
            warn!(error = %err, "container detail command is invalid");
            return Ok(None);
        }
    };
    match ctx.invoke(&command, true) {
        Ok(invocation) => match parse_detail(&invocation.output, container) {
            Ok(detail) => Ok(Some(detail)),
            Err(err) => {
                warn!(container = %container, error = %err, "skipping folder with unreadable detail");
                Ok(None)
            }
        },
        Err(InvokeError::Cancelled) => Err(Cancelled),
        Err(err) => {
            warn!(container = %container, error = %err, "skipping folder whose detail fetch failed");
            Ok(None)
        }
    }
}
