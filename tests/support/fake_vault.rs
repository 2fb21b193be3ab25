#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::{Arc, Mutex};

use serde_json::json;
use vault_owner_transfer::context::RunContext;
use vault_owner_transfer::invoker::{Invoker, ProcessRunner, RawRun};
use vault_owner_transfer::settings::TransferSettings;

#[derive(Clone, Debug, Default)]
pub struct FakeFolder {
    pub uid: String,
    pub name: String,
    pub teams: Vec<String>,
    pub owner: Option<String>,
    pub admins: BTreeSet<String>,
}

/// In-memory admin tool. Answers the default command set the way the real
/// tool does, records every argv, and counts state-changing calls.
#[derive(Debug, Default)]
pub struct VaultState {
    pub teams: Vec<(String, String)>,
    pub folders: Vec<FakeFolder>,
    pub users: Vec<String>,
    pub fail_detail: BTreeSet<String>,
    pub fail_grant: BTreeSet<String>,
    pub fail_owner: BTreeSet<String>,
    pub reject_spaced_flag: bool,
    pub text_only: bool,
    pub wrap_listings: bool,
    pub calls: Vec<Vec<String>>,
    pub material_changes: usize,
}

impl VaultState {
    pub fn team(mut self, uid: &str, name: &str) -> Self {
        self.teams.push((uid.to_string(), name.to_string()));
        self
    }

    pub fn folder(mut self, uid: &str, name: &str, teams: &[&str]) -> Self {
        self.folders.push(FakeFolder {
            uid: uid.to_string(),
            name: name.to_string(),
            teams: teams.iter().map(|team| team.to_string()).collect(),
            ..FakeFolder::default()
        });
        self
    }

    pub fn user(mut self, email: &str) -> Self {
        self.users.push(email.to_string());
        self
    }

    fn team_name(&self, uid: &str) -> String {
        self.teams
            .iter()
            .find(|(team_uid, _)| team_uid == uid)
            .map(|(_, name)| name.clone())
            .unwrap_or_default()
    }
}

#[derive(Clone, Default)]
pub struct FakeVault {
    state: Arc<Mutex<VaultState>>,
}

impl FakeVault {
    pub fn new(state: VaultState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut VaultState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.with(|state| state.calls.clone())
    }

    pub fn calls_for(&self, verb: &str) -> usize {
        self.calls()
            .iter()
            .filter(|argv| argv.first().map(String::as_str) == Some(verb))
            .count()
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls_for("share-folder") + self.calls_for("share-record")
    }

    pub fn material_changes(&self) -> usize {
        self.with(|state| state.material_changes)
    }

    pub fn folder(&self, uid: &str) -> FakeFolder {
        self.with(|state| {
            state
                .folders
                .iter()
                .find(|folder| folder.uid == uid)
                .cloned()
                .unwrap()
        })
    }

    pub fn context(&self) -> RunContext {
        let settings = TransferSettings::default();
        RunContext::new(
            Invoker::new(Box::new(self.clone())).with_flag(settings.tool.structured_flag()),
            settings.commands.clone(),
            settings.tool.text_layout(),
        )
    }
}

struct Parsed {
    verb: String,
    structured: bool,
    spaced_flag: bool,
    options: BTreeMap<String, String>,
    switches: BTreeSet<String>,
    positional: Vec<String>,
}

fn parse(argv: &[String]) -> Parsed {
    let mut parsed = Parsed {
        verb: argv.first().cloned().unwrap_or_default(),
        structured: false,
        spaced_flag: false,
        options: BTreeMap::new(),
        switches: BTreeSet::new(),
        positional: Vec::new(),
    };
    let mut iter = argv.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--format=json" {
            parsed.structured = true;
        } else if arg == "--format" {
            parsed.spaced_flag = true;
            parsed.structured = iter.next().map(String::as_str) == Some("json");
        } else if ["--action", "--email", "--manage-records", "--manage-users"].contains(&arg.as_str()) {
            let value = iter.next().cloned().unwrap_or_default();
            parsed.options.insert(arg.clone(), value);
        } else if arg.starts_with("--") {
            parsed.switches.insert(arg.clone());
        } else {
            parsed.positional.push(arg.clone());
        }
    }
    parsed
}

impl ProcessRunner for FakeVault {
    fn run(&self, argv: &[String]) -> io::Result<RawRun> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(argv.to_vec());
        let parsed = parse(argv);
        if state.reject_spaced_flag && parsed.spaced_flag {
            return Ok(RawRun::failed(
                2,
                "error: unrecognized arguments: --format json",
            ));
        }
        let structured = parsed.structured && !state.text_only;
        let uid = parsed.positional.last().cloned().unwrap_or_default();

        let run = match parsed.verb.as_str() {
            "list-team" => {
                if structured {
                    let items: Vec<_> = state
                        .teams
                        .iter()
                        .map(|(uid, name)| json!({"team_uid": uid, "name": name}))
                        .collect();
                    if state.wrap_listings {
                        RawRun::ok(json!({"teams": items}).to_string())
                    } else {
                        RawRun::ok(serde_json::to_string(&items).unwrap())
                    }
                } else {
                    let mut out = String::from("Team UID  Name\n--------  ----\n");
                    for (uid, name) in &state.teams {
                        out.push_str(&format!("{uid}  {name}  RW  3\n"));
                    }
                    RawRun::ok(out)
                }
            }
            "list-sf" => {
                if structured {
                    let items: Vec<_> = state
                        .folders
                        .iter()
                        .map(|folder| json!({"shared_folder_uid": folder.uid, "name": folder.name}))
                        .collect();
                    if state.wrap_listings {
                        RawRun::ok(json!({"shared_folders": items}).to_string())
                    } else {
                        RawRun::ok(serde_json::to_string(&items).unwrap())
                    }
                } else {
                    let mut out = String::from("Shared Folder UID  Name\n");
                    for folder in &state.folders {
                        out.push_str(&format!("{}  {}\n", folder.uid, folder.name));
                    }
                    RawRun::ok(out)
                }
            }
            "get" => {
                if state.fail_detail.contains(&uid) {
                    RawRun::failed(1, format!("access denied to {uid}"))
                } else if let Some(folder) = state.folders.iter().find(|folder| folder.uid == uid) {
                    if structured {
                        let teams: Vec<_> = folder
                            .teams
                            .iter()
                            .map(|team| json!({"team_uid": team, "name": state.team_name(team)}))
                            .collect();
                        RawRun::ok(
                            json!({
                                "shared_folder_uid": folder.uid,
                                "name": folder.name,
                                "teams": teams
                            })
                            .to_string(),
                        )
                    } else {
                        let mut out = format!("Shared Folder UID: {}\nName: {}\n", folder.uid, folder.name);
                        for team in &folder.teams {
                            out.push_str(&format!("Team UID: {team}\n"));
                        }
                        RawRun::ok(out)
                    }
                } else {
                    RawRun::failed(1, format!("{uid} not found"))
                }
            }
            "share-folder" => {
                let email = parsed.options.get("--email").cloned().unwrap_or_default();
                if state.fail_grant.contains(&uid) {
                    RawRun::failed(1, format!("grant rejected for {uid}"))
                } else {
                    let changed = match state.folders.iter_mut().find(|folder| folder.uid == uid) {
                        Some(folder) => folder.admins.insert(email),
                        None => return Ok(RawRun::failed(1, format!("{uid} not found"))),
                    };
                    if changed {
                        state.material_changes += 1;
                        RawRun::ok("permissions updated\n")
                    } else {
                        RawRun::ok("no changes\n")
                    }
                }
            }
            "share-record" => {
                let email = parsed.options.get("--email").cloned().unwrap_or_default();
                let dry_run = parsed.switches.contains("--dry-run");
                if state.fail_owner.contains(&uid) {
                    RawRun::failed(1, format!("ownership transfer rejected for {uid}"))
                } else {
                    let changed = match state.folders.iter_mut().find(|folder| folder.uid == uid) {
                        Some(folder) if !dry_run && folder.owner.as_deref() != Some(email.as_str()) => {
                            folder.owner = Some(email);
                            true
                        }
                        Some(_) => false,
                        None => return Ok(RawRun::failed(1, format!("{uid} not found"))),
                    };
                    if changed {
                        state.material_changes += 1;
                        RawRun::ok("ownership transferred\n")
                    } else {
                        RawRun::ok("no changes\n")
                    }
                }
            }
            "enterprise-info" => {
                if structured {
                    let items: Vec<_> = state
                        .users
                        .iter()
                        .map(|email| json!({"username": email}))
                        .collect();
                    RawRun::ok(serde_json::to_string(&items).unwrap())
                } else {
                    let mut out = String::from("#  Email  Status\n");
                    for (index, email) in state.users.iter().enumerate() {
                        out.push_str(&format!("{}  {email}  Active\n", index + 1));
                    }
                    RawRun::ok(out)
                }
            }
            other => RawRun::failed(1, format!("unknown command: {other}")),
        };
        Ok(run)
    }
}
