use std::fmt;

use serde_json::{Map, Value};
use tracing::warn;

use crate::entity::{ContainerDetail, EntityKind, NamedEntity, PermissionEntry};
use crate::invoker::ToolOutput;

const GROUP_UID_ALIASES: &[&str] = &["team_uid", "uid"];
const GROUP_NAME_ALIASES: &[&str] = &["name", "team_name"];
const CONTAINER_UID_ALIASES: &[&str] = &["shared_folder_uid", "folder_uid", "uid"];
const CONTAINER_NAME_ALIASES: &[&str] = &["name", "folder_name", "shared_folder_name"];
const PERMISSION_LIST_KEYS: &[&str] = &["teams", "team_permissions", "shared_folder_teams"];
const MIN_UID_LEN: usize = 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TextLayout {
    pub header_lines: usize,
}

impl Default for TextLayout {
    fn default() -> Self {
        Self { header_lines: 1 }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NormalizeStats {
    pub accepted: usize,
    pub skipped: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldLookup {
    Found(String),
    Missing,
}

impl FieldLookup {
    pub fn into_option(self) -> Option<String> {
        match self {
            FieldLookup::Found(value) => Some(value),
            FieldLookup::Missing => None,
        }
    }
}

/// Returns the first alias holding a non-blank string or number.
pub fn decode_field(object: &Map<String, Value>, aliases: &[&str]) -> FieldLookup {
    for alias in aliases {
        let value = match object.get(*alias) {
            Some(Value::String(text)) => text.trim().to_string(),
            Some(Value::Number(number)) => number.to_string(),
            _ => continue,
        };
        if !value.is_empty() {
            return FieldLookup::Found(value);
        }
    }
    FieldLookup::Missing
}

fn aliases(kind: EntityKind) -> (&'static [&'static str], &'static [&'static str]) {
    match kind {
        EntityKind::Group => (GROUP_UID_ALIASES, GROUP_NAME_ALIASES),
        EntityKind::Container => (CONTAINER_UID_ALIASES, CONTAINER_NAME_ALIASES),
    }
}

pub fn normalize(
    output: &ToolOutput,
    kind: EntityKind,
    layout: &TextLayout,
    stats: &mut NormalizeStats,
) -> anyhow::Result<Vec<NamedEntity>> {
    match output {
        ToolOutput::StructuredList(items) => from_structured(items, kind, stats),
        ToolOutput::StructuredSingle(map) if map.is_empty() => Ok(Vec::new()),
        ToolOutput::StructuredSingle(map) => match unwrap_listing(map, kind) {
            Some(items) => from_structured(items, kind, stats),
            None => from_structured(std::slice::from_ref(&Value::Object(map.clone())), kind, stats),
        },
        ToolOutput::TextLines(lines) => Ok(from_text(lines, layout, stats)),
    }
}

/// Some versions wrap the listing in an object such as `{"teams": [...]}`.
/// A wrapper whose only array is empty is an empty listing.
fn unwrap_listing(map: &Map<String, Value>, kind: EntityKind) -> Option<&Vec<Value>> {
    let (uid_aliases, _) = aliases(kind);
    if decode_field(map, uid_aliases) != FieldLookup::Missing {
        return None;
    }
    let arrays: Vec<&Vec<Value>> = map.values().filter_map(Value::as_array).collect();
    arrays
        .iter()
        .find(|items| items.iter().any(Value::is_object))
        .or_else(|| arrays.iter().find(|items| items.is_empty()))
        .copied()
}

fn from_structured(
    items: &[Value],
    kind: EntityKind,
    stats: &mut NormalizeStats,
) -> anyhow::Result<Vec<NamedEntity>> {
    let (uid_aliases, name_aliases) = aliases(kind);
    let mut entities = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let Some(object) = item.as_object() else {
            warn!(index, kind = kind.label(), "skipping non-object entry");
            stats.skipped += 1;
            continue;
        };
        let uid = decode_field(object, uid_aliases);
        let name = decode_field(object, name_aliases);
        match (uid, name) {
            (FieldLookup::Found(uid), FieldLookup::Found(name)) => {
                entities.push(NamedEntity { name, uid });
                stats.accepted += 1;
            }
            (uid, _) => {
                let missing = if uid == FieldLookup::Missing { "uid" } else { "name" };
                warn!(index, kind = kind.label(), missing, "skipping entry without required field");
                stats.skipped += 1;
            }
        }
    }
    if !items.is_empty() && entities.is_empty() {
        return Err(anyhow::anyhow!(
            "none of the {} {} entries carried both a uid and a name",
            items.len(),
            kind.label()
        ));
    }
    Ok(entities)
}

fn from_text(lines: &[String], layout: &TextLayout, stats: &mut NormalizeStats) -> Vec<NamedEntity> {
    let mut entities = Vec::new();
    for line in lines.iter().skip(layout.header_lines) {
        if line.trim().is_empty() || is_separator(line) {
            continue;
        }
        match parse_row(line) {
            Some(entity) => {
                entities.push(entity);
                stats.accepted += 1;
            }
            None => {
                warn!(line = %line.trim(), "skipping unparseable listing row");
                stats.skipped += 1;
            }
        }
    }
    entities
}

fn is_separator(line: &str) -> bool {
    line.chars()
        .all(|ch| matches!(ch, '-' | '=' | '+' | '|') || ch.is_whitespace())
}

/// Splits on runs of two or more whitespace characters (or a tab).
pub fn split_columns(line: &str) -> Vec<&str> {
    let mut columns = Vec::new();
    let mut start = 0;
    let mut gap_start: Option<usize> = None;
    let mut gap_len = 0;
    let mut gap_has_tab = false;
    for (idx, ch) in line.char_indices() {
        if ch.is_whitespace() {
            if gap_start.is_none() {
                gap_start = Some(idx);
                gap_len = 0;
                gap_has_tab = false;
            }
            gap_len += 1;
            gap_has_tab |= ch == '\t';
            continue;
        }
        if let Some(gap) = gap_start.take()
            && (gap_len >= 2 || gap_has_tab)
        {
            push_column(&mut columns, &line[start..gap]);
            start = idx;
        }
    }
    push_column(&mut columns, &line[start..]);
    columns
}

fn push_column<'a>(columns: &mut Vec<&'a str>, column: &'a str) {
    let column = column.trim();
    if !column.is_empty() {
        columns.push(column);
    }
}

fn parse_row(line: &str) -> Option<NamedEntity> {
    let mut columns = split_columns(line);
    if columns.len() >= 3 && is_row_number(columns[0]) && looks_like_uid(columns[1]) {
        columns.remove(0);
    }
    while columns.len() > 2 && columns.last().is_some_and(|tail| is_tail_token(tail)) {
        columns.pop();
    }
    if columns.len() < 2 {
        return None;
    }
    Some(NamedEntity {
        uid: columns[0].to_string(),
        name: columns[1..].join(" "),
    })
}

fn is_row_number(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|ch| ch.is_ascii_digit())
}

fn is_tail_token(token: &str) -> bool {
    let flags = token.len() <= 4
        && token
            .chars()
            .all(|ch| matches!(ch.to_ascii_uppercase(), 'R' | 'W' | 'S' | '-'));
    let numeric = token.chars().any(|ch| ch.is_ascii_digit())
        && token.chars().all(|ch| ch.is_ascii_digit() || ch == '.' || ch == ',');
    flags || numeric
}

pub fn looks_like_uid(token: &str) -> bool {
    token.len() >= MIN_UID_LEN
        && token
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DetailError {
    Empty,
    Unparseable(String),
}

impl fmt::Display for DetailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetailError::Empty => write!(f, "detail output was empty"),
            DetailError::Unparseable(reason) => write!(f, "detail output unparseable: {reason}"),
        }
    }
}

impl std::error::Error for DetailError {}

pub fn parse_detail(
    output: &ToolOutput,
    container: &NamedEntity,
) -> Result<ContainerDetail, DetailError> {
    match output {
        ToolOutput::StructuredSingle(map) => Ok(detail_from_object(map, container)),
        ToolOutput::StructuredList(items) => {
            let objects: Vec<&Map<String, Value>> =
                items.iter().filter_map(Value::as_object).collect();
            let chosen = objects
                .iter()
                .find(|object| {
                    decode_field(object, CONTAINER_UID_ALIASES)
                        == FieldLookup::Found(container.uid.clone())
                })
                .or_else(|| objects.first())
                .ok_or(DetailError::Empty)?;
            Ok(detail_from_object(chosen, container))
        }
        ToolOutput::TextLines(lines) => detail_from_text(lines, container),
    }
}

fn detail_from_object(map: &Map<String, Value>, container: &NamedEntity) -> ContainerDetail {
    let uid = decode_field(map, CONTAINER_UID_ALIASES)
        .into_option()
        .unwrap_or_else(|| container.uid.clone());
    let name = decode_field(map, CONTAINER_NAME_ALIASES)
        .into_option()
        .unwrap_or_else(|| container.name.clone());
    let permissions = PERMISSION_LIST_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_array))
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_object)
                .filter_map(permission_from_object)
                .collect()
        })
        .unwrap_or_default();
    ContainerDetail {
        entity: NamedEntity { name, uid },
        permissions,
    }
}

fn permission_from_object(object: &Map<String, Value>) -> Option<PermissionEntry> {
    let group_uid = decode_field(object, GROUP_UID_ALIASES).into_option();
    let group_name = decode_field(object, GROUP_NAME_ALIASES).into_option();
    if group_uid.is_none() && group_name.is_none() {
        return None;
    }
    Some(PermissionEntry {
        group_uid,
        group_name,
        manage_records: object.get("manage_records").and_then(flag_value),
        manage_users: object.get("manage_users").and_then(flag_value),
    })
}

fn flag_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.to_ascii_lowercase().as_str() {
            "on" | "true" | "yes" => Some(true),
            "off" | "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn detail_from_text(
    lines: &[String],
    container: &NamedEntity,
) -> Result<ContainerDetail, DetailError> {
    if lines.iter().all(|line| line.trim().is_empty()) {
        return Err(DetailError::Empty);
    }
    if !lines.iter().any(|line| line.contains(':')) {
        return Err(DetailError::Unparseable(
            "no `key: value` lines in text output".to_string(),
        ));
    }

    let mut permissions = Vec::new();
    let mut in_team_section = false;
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            in_team_section = false;
            continue;
        }
        match trimmed.split_once(':') {
            Some((key, value)) => {
                let key = key.trim().to_ascii_lowercase();
                let value = value.trim();
                in_team_section = false;
                if !key.contains("team") {
                    continue;
                }
                if value.is_empty() {
                    in_team_section = true;
                } else if key.contains("uid") {
                    permissions.push(PermissionEntry {
                        group_uid: Some(value.to_string()),
                        ..PermissionEntry::default()
                    });
                } else {
                    permissions.push(permission_from_text(value));
                }
            }
            None if in_team_section => permissions.push(permission_from_text(trimmed)),
            None => {}
        }
    }
    Ok(ContainerDetail {
        entity: container.clone(),
        permissions,
    })
}

fn permission_from_text(value: &str) -> PermissionEntry {
    let mut group_uid = None;
    let mut name_parts = Vec::new();
    for token in value.split_whitespace() {
        let bare = token.trim_matches(|ch: char| matches!(ch, '(' | ')' | '[' | ']' | ','));
        if group_uid.is_none() && looks_like_uid(bare) {
            group_uid = Some(bare.to_string());
        } else {
            name_parts.push(token);
        }
    }
    let name = name_parts.join(" ");
    PermissionEntry {
        group_uid,
        group_name: (!name.is_empty()).then_some(name),
        ..PermissionEntry::default()
    }
}
