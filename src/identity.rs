use std::fmt;

use serde_json::Value;
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::invoker::{CommandLine, ToolOutput};

/// The account receiving ownership: a normalized e-mail address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OwnerIdentity(String);

impl OwnerIdentity {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let value = raw.trim().to_ascii_lowercase();
        let Some((local, domain)) = value.split_once('@') else {
            return Err(anyhow::anyhow!("new owner must be an e-mail address: {raw:?}"));
        };
        let valid = !local.is_empty()
            && !domain.contains('@')
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && !value.chars().any(char::is_whitespace);
        if !valid {
            return Err(anyhow::anyhow!("new owner is not a valid e-mail address: {raw:?}"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OwnerCheck {
    Known,
    Unknown,
    Unverified,
}

/// Best-effort lookup of the owner in the vault's user listing.
pub fn verify_known(ctx: &mut RunContext, owner: &OwnerIdentity) -> OwnerCheck {
    let command = match CommandLine::parse(&ctx.commands.user_listing) {
        Ok(command) => command,
        Err(err) => {
            warn!(error = %err, "user listing command is invalid; owner not verified");
            return OwnerCheck::Unverified;
        }
    };
    let invocation = match ctx.invoke(&command, true) {
        Ok(invocation) => invocation,
        Err(err) => {
            warn!(error = %err, "could not list users; owner not verified");
            return OwnerCheck::Unverified;
        }
    };
    let found = match &invocation.output {
        ToolOutput::StructuredList(items) => items.iter().any(|item| value_mentions(item, owner)),
        ToolOutput::StructuredSingle(map) => map.values().any(|item| value_mentions(item, owner)),
        ToolOutput::TextLines(lines) => lines.iter().any(|line| line_mentions(line, owner)),
    };
    debug!(owner = %owner, found, "owner lookup");
    if found {
        OwnerCheck::Known
    } else {
        OwnerCheck::Unknown
    }
}

fn value_mentions(value: &Value, owner: &OwnerIdentity) -> bool {
    match value {
        Value::String(text) => text.trim().eq_ignore_ascii_case(owner.as_str()),
        Value::Array(items) => items.iter().any(|item| value_mentions(item, owner)),
        Value::Object(map) => map.values().any(|item| value_mentions(item, owner)),
        _ => false,
    }
}

/// Compares whole address-shaped tokens, so `max@corp.io` never vouches for `x@corp.io`.
fn line_mentions(line: &str, owner: &OwnerIdentity) -> bool {
    line.split(|ch: char| !is_address_char(ch))
        .map(|token| token.trim_matches('.'))
        .any(|token| token.eq_ignore_ascii_case(owner.as_str()))
}

fn is_address_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '@' | '.' | '_' | '-' | '+' | '%')
}
