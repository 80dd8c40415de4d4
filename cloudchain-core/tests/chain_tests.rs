//! Chain lifecycle: initialization, sequential growth, violations, reset.

mod support;

use chrono::Utc;
use cloudchain_core::layout::LocalRoot;
use cloudchain_core::naming::NamingMismatch;
use cloudchain_core::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use support::{ident, BASE};

fn manager(dir: &tempfile::TempDir) -> ChainManager {
    let root = LocalRoot::new(dir.path());
    root.ensure().unwrap();
    ChainManager::open(root, "gmail.com").unwrap()
}

// ── Initialization ──

#[test]
fn fresh_root_is_uninitialized() {
    let dir = tempfile::tempdir().unwrap();
    let chain = manager(&dir);
    assert!(!chain.is_initialized());
    assert!(chain.accounts().is_empty());
    assert!(matches!(chain.active(), Err(ChainError::NotInitialized)));
    assert!(matches!(chain.propose_next(), Err(ChainError::NotInitialized)));
}

#[test]
fn initialize_creates_active_first_account() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    let first = chain.initialize(BASE, &ident(1)).unwrap().clone();

    assert_eq!(first.index, 1);
    assert_eq!(first.identifier, "mybackup001.cloudchain@gmail.com");
    assert_eq!(first.status, AccountStatus::Active);
    assert!(dir.path().join("chain.json").is_file());
}

#[test]
fn initialize_twice_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    chain.initialize(BASE, &ident(1)).unwrap();
    assert!(matches!(
        chain.initialize(BASE, &ident(1)),
        Err(ChainError::AlreadyInitialized)
    ));
}

#[test]
fn initialize_rejects_first_account_with_index_two() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    let err = chain.initialize(BASE, &ident(2)).unwrap_err();
    assert!(matches!(
        err,
        ChainError::SequenceViolation(NamingMismatch::WrongIndex {
            expected: 1,
            found: 2
        })
    ));
    assert!(!chain.is_initialized());
    assert!(!dir.path().join("chain.json").exists());
}

#[test]
fn initialize_rejects_identifier_of_other_base() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    let err = chain
        .initialize(BASE, "otherbase001.cloudchain@gmail.com")
        .unwrap_err();
    assert!(matches!(
        err,
        ChainError::SequenceViolation(NamingMismatch::WrongBase { .. })
    ));
}

// ── Sequential growth ──

#[test]
fn propose_next_does_not_mutate() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    chain.initialize(BASE, &ident(1)).unwrap();
    let before = std::fs::read(dir.path().join("chain.json")).unwrap();

    let proposed = chain.propose_next().unwrap();
    assert_eq!(proposed.index, 2);
    assert_eq!(proposed.identifier, "mybackup002.cloudchain@gmail.com");
    assert_eq!(proposed.status, AccountStatus::Pending);

    assert_eq!(chain.accounts().len(), 1);
    assert_eq!(std::fs::read(dir.path().join("chain.json")).unwrap(), before);
}

#[test]
fn three_account_chain_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    chain.initialize(BASE, &ident(1)).unwrap();
    chain.confirm_add(&ident(2)).unwrap();
    chain.confirm_add(&ident(3)).unwrap();

    let statuses: Vec<_> = chain.accounts().iter().map(|a| a.status).collect();
    assert_eq!(
        statuses,
        vec![
            AccountStatus::Exhausted,
            AccountStatus::Exhausted,
            AccountStatus::Active
        ]
    );
    assert_eq!(chain.active().unwrap().identifier, ident(3));
    assert_eq!(chain.propose_next().unwrap().identifier, ident(4));
}

#[test]
fn chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut chain = manager(&dir);
        chain.initialize(BASE, &ident(1)).unwrap();
        chain.confirm_add(&ident(2)).unwrap();
        chain.record_quota(2, 10, 100).unwrap();
    }
    let chain = manager(&dir);
    assert_eq!(chain.accounts().len(), 2);
    assert_eq!(chain.active().unwrap().index, 2);
    assert_eq!(chain.active().unwrap().quota.unwrap().used_bytes, 10);
    assert_eq!(chain.state().unwrap().base, BASE);
}

#[test]
fn skipping_an_index_is_rejected_without_change() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    chain.initialize(BASE, &ident(1)).unwrap();
    let before = chain.state().unwrap().clone();

    let err = chain.confirm_add(&ident(3)).unwrap_err();
    assert!(matches!(
        err,
        ChainError::SequenceViolation(NamingMismatch::WrongIndex {
            expected: 2,
            found: 3
        })
    ));
    assert_eq!(chain.state().unwrap(), &before);
    assert_eq!(manager(&dir).state().unwrap(), &before);
}

#[test]
fn wrong_domain_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    chain.initialize(BASE, &ident(1)).unwrap();
    let err = chain
        .confirm_add("mybackup002.cloudchain@yahoo.com")
        .unwrap_err();
    assert!(matches!(
        err,
        ChainError::SequenceViolation(NamingMismatch::WrongDomain { .. })
    ));
}

#[test]
fn base_comparison_is_case_sensitive() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    chain.initialize(BASE, &ident(1)).unwrap();
    assert!(chain
        .confirm_add("MyBackup002.cloudchain@gmail.com")
        .is_err());
}

#[test]
fn malformed_identifiers_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    chain.initialize(BASE, &ident(1)).unwrap();
    for bad in [
        "mybackup2.cloudchain@gmail.com",
        "mybackup0002.cloudchain@gmail.com",
        "mybackup002cloudchain@gmail.com",
        "mybackup002.cloudchain",
        "mybackup002.cloudchain@",
        " mybackup002.cloudchain@gmail.com",
    ] {
        let err = chain.confirm_add(bad).unwrap_err();
        assert!(
            matches!(err, ChainError::SequenceViolation(_)),
            "{bad} gave {err:?}"
        );
    }
    assert_eq!(chain.accounts().len(), 1);
}

#[test]
fn chain_full_after_999_accounts() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = (1..=999)
        .map(|i| Account {
            index: i,
            identifier: ident(i),
            status: if i == 999 {
                AccountStatus::Active
            } else {
                AccountStatus::Exhausted
            },
            quota: None,
        })
        .collect();
    let state = ChainState {
        base: BASE.into(),
        domain: "gmail.com".into(),
        created_at: Utc::now(),
        accounts,
    };
    std::fs::write(
        dir.path().join("chain.json"),
        serde_json::to_vec(&state).unwrap(),
    )
    .unwrap();

    let chain = manager(&dir);
    assert!(matches!(chain.propose_next(), Err(ChainError::ChainFull(1000))));
}

#[test]
fn corrupt_chain_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("chain.json"), b"{ not json").unwrap();
    let err = ChainManager::open(LocalRoot::new(dir.path()), "gmail.com").err();
    assert!(matches!(err, Some(ChainError::CorruptState(_))));
}

// ── Quota ──

#[test]
fn quota_only_recorded_for_active_account() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    chain.initialize(BASE, &ident(1)).unwrap();
    chain.confirm_add(&ident(2)).unwrap();

    let err = chain.record_quota(1, 5, 10).unwrap_err();
    assert!(matches!(
        err,
        ChainError::AccountNotActive {
            index: 1,
            active: 2
        }
    ));
    assert!(matches!(
        chain.record_quota(9, 5, 10),
        Err(ChainError::UnknownAccount(9))
    ));
}

#[test]
fn rollover_follows_latest_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    chain.initialize(BASE, &ident(1)).unwrap();
    assert!(!chain.rollover_required().unwrap());

    chain.record_quota(1, 949, 1000).unwrap();
    assert!(!chain.rollover_required().unwrap());
    chain.record_quota(1, 950, 1000).unwrap();
    assert!(chain.rollover_required().unwrap());
}

#[test]
fn nearly_full_free_tier_account_requires_rollover() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    chain.initialize(BASE, &ident(1)).unwrap();

    // 14.3 GiB of 15 GiB.
    chain.record_quota(1, 143 * quota::GIB / 10, 15 * quota::GIB).unwrap();
    assert!(chain.rollover_required().unwrap());

    // 14 GiB of 15 GiB is below both the ratio and the floor.
    chain.record_quota(1, 14 * quota::GIB, 15 * quota::GIB).unwrap();
    assert!(!chain.rollover_required().unwrap());
}

// ── Reset ──

#[test]
fn reset_removes_chain_and_account_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let root = LocalRoot::new(dir.path());
    let mut chain = manager(&dir);
    chain.initialize(BASE, &ident(1)).unwrap();
    chain.confirm_add(&ident(2)).unwrap();
    for n in 1..=2 {
        let acct = root.account_dir(&naming::account_dir_name(BASE, n));
        std::fs::create_dir_all(&acct).unwrap();
        std::fs::write(acct.join("payload.bin"), b"x").unwrap();
    }
    std::fs::write(dir.path().join("unrelated.txt"), b"keep").unwrap();

    chain.reset().unwrap();

    assert!(!chain.is_initialized());
    assert!(!dir.path().join("chain.json").exists());
    assert!(!root.account_dir("mybackup001.cloudchain").exists());
    assert!(!root.account_dir("mybackup002.cloudchain").exists());
    assert!(dir.path().join("unrelated.txt").exists());

    chain.initialize("fresh", "fresh001.cloudchain@gmail.com").unwrap();
    assert_eq!(chain.state().unwrap().base, "fresh");
}

#[test]
fn reset_of_uninitialized_root_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = manager(&dir);
    assert!(matches!(chain.reset(), Err(ChainError::NotInitialized)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn usage_at_or_above_the_floor_always_rolls_over(
        extra in 0u64..=quota::GIB,
        total in 0u64..=100 * quota::GIB,
    ) {
        prop_assert!(quota::needs_rollover(quota::ROLLOVER_FLOOR_BYTES + extra, total));
    }

    #[test]
    fn rollover_is_monotonic_in_usage(
        used in 0u64..=16 * quota::GIB,
        more in 0u64..=quota::GIB,
        total in 1u64..=16 * quota::GIB,
    ) {
        if quota::needs_rollover(used, total) {
            prop_assert!(quota::needs_rollover(used + more, total));
        }
    }

    #[test]
    fn below_the_floor_only_the_ratio_decides(
        used in 0u64..quota::ROLLOVER_FLOOR_BYTES,
        total in 1u64..=100 * quota::GIB,
    ) {
        let ratio_reached = u128::from(used) * 100 >= u128::from(total) * 95;
        prop_assert_eq!(quota::needs_rollover(used, total), ratio_reached);
    }

    #[test]
    fn only_the_proposed_index_is_accepted(index in 1u32..=999) {
        let dir = tempfile::tempdir().unwrap();
        let mut chain = manager(&dir);
        chain.initialize(BASE, &ident(1)).unwrap();

        let result = chain.confirm_add(&ident(index));
        if index == 2 {
            prop_assert!(result.is_ok());
            prop_assert_eq!(chain.accounts().len(), 2);
        } else {
            prop_assert!(
                matches!(result, Err(ChainError::SequenceViolation(_))),
                "index {} was not rejected",
                index
            );
            prop_assert_eq!(chain.accounts().len(), 1);
        }
    }
}
