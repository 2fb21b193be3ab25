#[path = "support/fake_vault.rs"]
mod fake_vault;

use std::cell::Cell;
use std::rc::Rc;

use fake_vault::{FakeVault, VaultState};
use vault_owner_transfer::entity::NamedEntity;
use vault_owner_transfer::orchestrator::{Orchestrator, RunOptions, RunStatus};
use vault_owner_transfer::cancel::CancelFlag;
use vault_owner_transfer::selector::{FilterSelector, Selector};
use vault_owner_transfer::settings::{TransferSettings, load_settings};
use vault_owner_transfer::targets::RunMode;

const OWNER: &str = "new.owner@example.com";

fn vault() -> FakeVault {
    FakeVault::new(
        VaultState::default()
            .team("G1", "Sales")
            .team("G2", "Support")
            .folder("SF1", "Payroll", &["G1"])
            .folder("SF2", "Ops", &["G2"])
            .folder("SF3", "Legal", &["G1", "G2"])
            .user(OWNER),
    )
}

fn approve(_: &str) -> anyhow::Result<bool> {
    Ok(true)
}

fn decline(_: &str) -> anyhow::Result<bool> {
    Ok(false)
}

fn base_options(mode: RunMode) -> RunOptions {
    RunOptions {
        owner: Some(OWNER.to_string()),
        mode,
        recursive: true,
        assume_yes: true,
        ..RunOptions::default()
    }
}

fn orchestrator<'a>(
    vault: &FakeVault,
    settings: TransferSettings,
    options: RunOptions,
    confirm: Box<dyn FnMut(&str) -> anyhow::Result<bool> + 'a>,
) -> Orchestrator<'a> {
    Orchestrator::new(
        vault.context(),
        settings,
        options,
        Box::new(FilterSelector::new(Vec::new())),
        confirm,
    )
}

#[test]
fn explicit_folders_are_transferred() {
    let vault = vault();
    let options = RunOptions {
        containers: vec!["payroll".to_string(), "SF2".to_string()],
        ..base_options(RunMode::ExplicitContainers)
    };

    let status = orchestrator(&vault, TransferSettings::default(), options, Box::new(approve))
        .run()
        .expect("run");

    assert_eq!(status, RunStatus::Completed { targets: 2, failures: 0 });
    assert_eq!(status.exit_code(), 0);
    assert_eq!(vault.folder("SF1").owner.as_deref(), Some(OWNER));
    assert_eq!(vault.folder("SF3").owner, None);
}

#[test]
fn group_mode_discovers_folders_through_team_permissions() {
    let vault = vault();
    let options = RunOptions {
        groups: vec!["Support".to_string()],
        ..base_options(RunMode::GroupDriven)
    };

    let status = orchestrator(&vault, TransferSettings::default(), options, Box::new(approve))
        .run()
        .expect("run");

    assert_eq!(status, RunStatus::Completed { targets: 2, failures: 0 });
    assert_eq!(vault.folder("SF1").owner, None);
    assert_eq!(vault.folder("SF2").owner.as_deref(), Some(OWNER));
    assert_eq!(vault.folder("SF3").owner.as_deref(), Some(OWNER));
}

#[test]
fn empty_target_set_is_a_clean_no_op() {
    let vault = vault();
    let options = RunOptions {
        containers: vec!["does-not-exist".to_string()],
        ..base_options(RunMode::ExplicitContainers)
    };

    let status = orchestrator(&vault, TransferSettings::default(), options, Box::new(approve))
        .run()
        .expect("run");

    assert_eq!(status, RunStatus::NothingToDo);
    assert_eq!(status.exit_code(), 0);
    assert_eq!(vault.mutating_calls(), 0);
}

#[test]
fn declined_confirmation_changes_nothing() {
    let vault = vault();
    let prompts = Rc::new(Cell::new(0));
    let seen = Rc::clone(&prompts);
    let options = RunOptions {
        containers: vec!["SF1".to_string()],
        interactive: true,
        assume_yes: false,
        ..base_options(RunMode::ExplicitContainers)
    };
    let confirm = move |_: &str| -> anyhow::Result<bool> {
        seen.set(seen.get() + 1);
        decline("")
    };

    let status = orchestrator(&vault, TransferSettings::default(), options, Box::new(confirm))
        .run()
        .expect("run");

    assert_eq!(status, RunStatus::Declined);
    assert_eq!(status.exit_code(), 0);
    assert_eq!(prompts.get(), 1);
    assert_eq!(vault.mutating_calls(), 0);
}

#[test]
fn partial_failure_maps_to_exit_two() {
    let vault = vault();
    vault.with(|state| {
        state.fail_grant.insert("SF2".to_string());
    });
    let options = RunOptions {
        containers: vec!["SF1".to_string(), "SF2".to_string(), "SF3".to_string()],
        ..base_options(RunMode::ExplicitContainers)
    };

    let mut orchestrator =
        orchestrator(&vault, TransferSettings::default(), options, Box::new(approve));
    let status = orchestrator.run().expect("run");

    assert_eq!(status, RunStatus::Completed { targets: 3, failures: 1 });
    assert_eq!(status.exit_code(), 2);
    assert_eq!(orchestrator.context().counters.failed_actions, 1);
    assert_eq!(vault.mutating_calls(), 6);
}

#[test]
fn cancellation_before_transfer_exits_130_without_mutations() {
    let vault = vault();
    let options = RunOptions {
        containers: vec!["SF1".to_string()],
        ..base_options(RunMode::ExplicitContainers)
    };
    let mut orchestrator =
        orchestrator(&vault, TransferSettings::default(), options, Box::new(approve));
    orchestrator.context().cancel.cancel();

    let status = orchestrator.run().expect("run");

    assert_eq!(status, RunStatus::Cancelled);
    assert_eq!(status.exit_code(), 130);
    assert_eq!(vault.mutating_calls(), 0);
}

#[test]
fn unknown_owner_is_fatal_only_when_required() {
    let vault = FakeVault::new(VaultState::default().folder("SF1", "Payroll", &[]));
    let options = RunOptions {
        containers: vec!["SF1".to_string()],
        ..base_options(RunMode::ExplicitContainers)
    };

    let mut strict = TransferSettings::default();
    strict.run.require_known_owner = true;
    let err = orchestrator(&vault, strict, options.clone(), Box::new(approve))
        .run()
        .expect_err("unknown owner must abort");
    assert!(err.to_string().contains(OWNER));
    assert_eq!(vault.mutating_calls(), 0);

    let status = orchestrator(&vault, TransferSettings::default(), options, Box::new(approve))
        .run()
        .expect("run");
    assert_eq!(status, RunStatus::Completed { targets: 1, failures: 0 });
}

#[test]
fn invalid_owner_aborts_before_any_call() {
    let vault = vault();
    let options = RunOptions {
        owner: Some("not-an-address".to_string()),
        containers: vec!["SF1".to_string()],
        ..base_options(RunMode::ExplicitContainers)
    };

    assert!(
        orchestrator(&vault, TransferSettings::default(), options, Box::new(approve))
            .run()
            .is_err()
    );
    assert!(vault.calls().is_empty());
}

#[test]
fn non_interactive_run_needs_a_selection() {
    let vault = vault();

    let err = orchestrator(
        &vault,
        TransferSettings::default(),
        base_options(RunMode::GroupDriven),
        Box::new(approve),
    )
    .run()
    .expect_err("nothing was selected");

    assert!(err.to_string().contains("nothing selected"));
    assert_eq!(vault.mutating_calls(), 0);
}

#[test]
fn resolved_list_is_saved_and_reused() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().to_path_buf();
    let vault = vault();
    let options = RunOptions {
        groups: vec!["G1".to_string()],
        ..RunOptions::default()
    };

    let saved = orchestrator(&vault, TransferSettings::default(), options, Box::new(approve))
        .with_config_dir(Some(dir.clone()))
        .resolve_and_save()
        .expect("resolve")
        .expect("not cancelled");
    assert_eq!(saved.len(), 2);
    assert_eq!(vault.mutating_calls(), 0);

    let settings = load_settings(Some(&dir)).expect("load settings");
    let resolved = settings.resolved.clone().expect("resolved list persisted");
    assert!(resolved.captured_at.is_some());
    assert_eq!(resolved.groups, vec![NamedEntity::new("Sales", "G1")]);
    assert_eq!(
        resolved.containers,
        vec![NamedEntity::new("Payroll", "SF1"), NamedEntity::new("Legal", "SF3")]
    );

    let gets_before = vault.calls_for("get");
    let status = orchestrator(&vault, settings, base_options(RunMode::PreResolved), Box::new(approve))
        .run()
        .expect("run");
    assert_eq!(status, RunStatus::Completed { targets: 2, failures: 0 });
    assert_eq!(vault.calls_for("get"), gets_before);
    assert_eq!(vault.folder("SF3").owner.as_deref(), Some(OWNER));
}

#[test]
fn saved_mode_without_a_saved_list_fails() {
    let vault = vault();

    let err = orchestrator(
        &vault,
        TransferSettings::default(),
        base_options(RunMode::PreResolved),
        Box::new(approve),
    )
    .run()
    .expect_err("no saved list");

    assert!(err.to_string().contains("resolve"));
    assert_eq!(vault.mutating_calls(), 0);
}

#[test]
fn save_resolved_flag_persists_during_a_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let vault = vault();
    let options = RunOptions {
        groups: vec!["Sales".to_string()],
        save_resolved: true,
        dry_run: true,
        ..base_options(RunMode::GroupDriven)
    };

    let status = orchestrator(&vault, TransferSettings::default(), options, Box::new(decline))
        .with_config_dir(Some(temp.path().to_path_buf()))
        .run()
        .expect("run");

    assert_eq!(status, RunStatus::Completed { targets: 2, failures: 0 });
    assert_eq!(vault.calls_for("share-folder"), 0);
    let stored = load_settings(Some(temp.path())).expect("load settings");
    assert_eq!(stored.resolved.map(|saved| saved.containers.len()), Some(2));
}

#[test]
fn empty_wrapped_listings_end_with_nothing_to_do() {
    let vault = FakeVault::new(VaultState::default().user(OWNER));
    vault.with(|state| state.wrap_listings = true);
    let options = RunOptions {
        groups: vec!["Sales".to_string()],
        ..base_options(RunMode::GroupDriven)
    };

    let status = orchestrator(&vault, TransferSettings::default(), options, Box::new(approve))
        .run()
        .expect("empty listings are not a failure");

    assert_eq!(status, RunStatus::NothingToDo);
    assert_eq!(vault.mutating_calls(), 0);
}

#[test]
fn text_user_listing_needs_the_exact_owner_address() {
    let vault = FakeVault::new(
        VaultState::default()
            .folder("SF1", "Payroll", &[])
            .user("max@corp.io"),
    );
    vault.with(|state| state.text_only = true);
    let options = RunOptions {
        owner: Some("x@corp.io".to_string()),
        containers: vec!["SF1".to_string()],
        ..base_options(RunMode::ExplicitContainers)
    };
    let mut strict = TransferSettings::default();
    strict.run.require_known_owner = true;

    let err = orchestrator(&vault, strict.clone(), options.clone(), Box::new(approve))
        .run()
        .expect_err("a longer address must not vouch for the owner");
    assert!(err.to_string().contains("x@corp.io"));
    assert_eq!(vault.mutating_calls(), 0);

    vault.with(|state| state.users.push("x@corp.io".to_string()));
    let status = orchestrator(&vault, strict, options, Box::new(approve))
        .run()
        .expect("owner listed");
    assert_eq!(status, RunStatus::Completed { targets: 1, failures: 0 });
}

struct InterruptedMenu(CancelFlag);

impl Selector for InterruptedMenu {
    fn choose_many(
        &mut self,
        _prompt: &str,
        items: &[NamedEntity],
    ) -> anyhow::Result<Vec<NamedEntity>> {
        self.0.cancel();
        Ok(items.to_vec())
    }
}

#[test]
fn ctrl_c_at_the_menu_cancels_before_any_scan() {
    let vault = vault();
    let ctx = vault.context();
    let selector = InterruptedMenu(ctx.cancel.clone());
    let options = RunOptions {
        interactive: true,
        ..base_options(RunMode::GroupDriven)
    };

    let status = Orchestrator::new(
        ctx,
        TransferSettings::default(),
        options,
        Box::new(selector),
        Box::new(approve),
    )
    .run()
    .expect("run");

    assert_eq!(status, RunStatus::Cancelled);
    assert_eq!(vault.calls_for("get"), 0);
    assert_eq!(vault.mutating_calls(), 0);
}

#[test]
fn ctrl_c_at_the_confirmation_discards_the_answer() {
    let vault = vault();
    let ctx = vault.context();
    let cancel = ctx.cancel.clone();
    let options = RunOptions {
        containers: vec!["SF1".to_string()],
        interactive: true,
        assume_yes: false,
        ..base_options(RunMode::ExplicitContainers)
    };
    let confirm = move |_: &str| -> anyhow::Result<bool> {
        cancel.cancel();
        Ok(true)
    };

    let status = Orchestrator::new(
        ctx,
        TransferSettings::default(),
        options,
        Box::new(FilterSelector::new(Vec::new())),
        Box::new(confirm),
    )
    .run()
    .expect("run");

    assert_eq!(status, RunStatus::Cancelled);
    assert_eq!(status.exit_code(), 130);
    assert_eq!(vault.mutating_calls(), 0);
}
