use std::collections::BTreeSet;
use std::io::{BufRead, Write};

use tracing::warn;

use crate::entity::NamedEntity;

const MAX_PROMPT_ATTEMPTS: usize = 3;

/// Picks a subset of teams or folders; the run never cares which UI did it.
pub trait Selector {
    fn choose_many(
        &mut self,
        prompt: &str,
        items: &[NamedEntity],
    ) -> anyhow::Result<Vec<NamedEntity>>;
}

/// Numbered console menu. Accepts `all`, indices and ranges (`1,3-5`);
/// an empty answer selects nothing.
pub struct ConsoleSelector<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsoleSelector<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Selector for ConsoleSelector<R, W> {
    fn choose_many(
        &mut self,
        prompt: &str,
        items: &[NamedEntity],
    ) -> anyhow::Result<Vec<NamedEntity>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        writeln!(self.output, "{prompt}")?;
        for (idx, item) in items.iter().enumerate() {
            writeln!(self.output, "  {:>3}) {}  [{}]", idx + 1, item.name, item.uid)?;
        }
        for _ in 0..MAX_PROMPT_ATTEMPTS {
            write!(self.output, "Select (e.g. 1,3-5 or all; empty to skip): ")?;
            self.output.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(Vec::new());
            }
            match parse_selection(line.trim(), items.len()) {
                Ok(indices) => {
                    return Ok(indices.into_iter().map(|idx| items[idx].clone()).collect());
                }
                Err(err) => writeln!(self.output, "{err}")?,
            }
        }
        Err(anyhow::anyhow!("no valid selection after {MAX_PROMPT_ATTEMPTS} attempts"))
    }
}

/// Zero-based indices for a selection expression over `len` items.
pub fn parse_selection(raw: &str, len: usize) -> anyhow::Result<BTreeSet<usize>> {
    let mut picked = BTreeSet::new();
    if raw.is_empty() {
        return Ok(picked);
    }
    if raw.eq_ignore_ascii_case("all") || raw == "*" {
        return Ok((0..len).collect());
    }
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let (start, end) = match part.split_once('-') {
            Some((start, end)) => (parse_index(start, len)?, parse_index(end, len)?),
            None => {
                let idx = parse_index(part, len)?;
                (idx, idx)
            }
        };
        if start > end {
            return Err(anyhow::anyhow!("invalid range: {part}"));
        }
        picked.extend(start..=end);
    }
    Ok(picked)
}

fn parse_index(raw: &str, len: usize) -> anyhow::Result<usize> {
    let value: usize = raw
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("not a number: {raw}"))?;
    if value == 0 || value > len {
        return Err(anyhow::anyhow!("choice out of range (1-{len}): {value}"));
    }
    Ok(value - 1)
}

/// Non-interactive selection by UID or case-insensitive name.
pub struct FilterSelector {
    filters: Vec<String>,
}

impl FilterSelector {
    pub fn new(filters: Vec<String>) -> Self {
        Self { filters }
    }
}

impl Selector for FilterSelector {
    fn choose_many(
        &mut self,
        _prompt: &str,
        items: &[NamedEntity],
    ) -> anyhow::Result<Vec<NamedEntity>> {
        for filter in &self.filters {
            if !items.iter().any(|item| item.matches_filter(filter)) {
                warn!(filter = %filter, "selection matched nothing");
            }
        }
        Ok(items
            .iter()
            .filter(|item| self.filters.iter().any(|filter| item.matches_filter(filter)))
            .cloned()
            .collect())
    }
}

/// Yes/no prompt; anything but `y`/`yes` declines.
pub fn confirm<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    prompt: &str,
) -> anyhow::Result<bool> {
    write!(output, "{prompt} [y/N]: ")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
