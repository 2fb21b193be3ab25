use chrono::{DateTime, Duration, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::association::AssociationResolver;
use crate::context::RunContext;
use crate::entity::{EntityKind, NamedEntity, TargetOrigin, TargetSet};
use crate::listing::list_entities;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Discover shared folders through team permissions.
    #[default]
    #[value(name = "groups")]
    GroupDriven,
    /// Use the named shared folders as given.
    #[value(name = "folders")]
    ExplicitContainers,
    /// Reuse the list saved by an earlier `resolve`.
    #[value(name = "saved")]
    PreResolved,
}

#[derive(Clone, Debug, Default)]
pub struct TargetRequest {
    pub mode: RunMode,
    pub groups: Vec<NamedEntity>,
    pub containers: Vec<NamedEntity>,
    pub captured_at: Option<DateTime<Utc>>,
    /// Full folder listing when the caller already fetched one.
    pub container_listing: Option<Vec<NamedEntity>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Staleness {
    Unknown,
    Fresh(Duration),
    Stale(Duration),
}

impl Staleness {
    pub fn assess(
        captured_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        stale_after_days: i64,
    ) -> Self {
        match captured_at {
            None => Staleness::Unknown,
            Some(at) => {
                let age = now.signed_duration_since(at);
                if age > Duration::days(stale_after_days) {
                    Staleness::Stale(age)
                } else {
                    Staleness::Fresh(age)
                }
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Staleness::Unknown => {
                "saved folder list has an unknown capture time; it may no longer match the vault"
                    .to_string()
            }
            Staleness::Fresh(age) => format!(
                "saved folder list was captured {} ago; folders added since then are not included",
                human_age(*age)
            ),
            Staleness::Stale(age) => format!(
                "saved folder list is STALE (captured {} ago); run `resolve` again to refresh it",
                human_age(*age)
            ),
        }
    }
}

fn human_age(age: Duration) -> String {
    if age.num_days() > 0 {
        format!("{}d {}h", age.num_days(), age.num_hours() % 24)
    } else if age.num_hours() > 0 {
        format!("{}h {}m", age.num_hours(), age.num_minutes() % 60)
    } else {
        format!("{}m", age.num_minutes().max(0))
    }
}

/// Produces the deduplicated target set for the requested mode.
pub fn build_target_set(
    ctx: &mut RunContext,
    resolver: &mut AssociationResolver,
    request: TargetRequest,
    stale_after_days: i64,
) -> anyhow::Result<TargetSet> {
    let set = match request.mode {
        RunMode::GroupDriven => {
            if request.groups.is_empty() {
                return Err(anyhow::anyhow!("no teams selected for folder discovery"));
            }
            let all_containers = match request.container_listing {
                Some(listing) => listing,
                None => list_entities(ctx, EntityKind::Container)?,
            };
            let discovered = resolver.resolve(ctx, &request.groups, &all_containers)?;
            TargetSet::build(
                discovered.into_iter().chain(request.containers),
                TargetOrigin::Discovered,
            )
        }
        RunMode::ExplicitContainers => TargetSet::build(request.containers, TargetOrigin::Explicit),
        RunMode::PreResolved => {
            let staleness = Staleness::assess(request.captured_at, Utc::now(), stale_after_days);
            warn!("{}", staleness.describe());
            TargetSet::build(
                request.containers,
                TargetOrigin::PreResolved {
                    captured_at: request.captured_at,
                },
            )
        }
    };
    ctx.counters.skipped_entities += set.dropped();
    info!(mode = ?request.mode, targets = set.len(), "target set built");
    Ok(set)
}
