//! Lock and unlock across a mixed rotation history.

use rekey::perms::LinkKind;
use rekey::{Credential, ErrorKind, KeyVersion, Login, RekeyConfig, Session, VersionState};
use rekey::store::{Authority, MemoryAuthority};
use rekey_testkit::TestWorld;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// v1 register (A), v2 renew, v3 renew with B, v4 admin reset (C), v5 renew,
/// v6 admin reset (D), v7 renew.
async fn seven_versions(world: &TestWorld) -> Session<MemoryAuthority> {
    let alice = Login::from("alice");
    let admin = world.admin();

    let mut session = world.register("alice", "A").await;
    session.renew_keys(None).await.unwrap();
    session.renew_keys(Some(Credential::from("B"))).await.unwrap();

    admin.overwrite_keys(&alice, &Credential::from("C")).await.unwrap();
    let mut session = world.login("alice", "C").await.unwrap();
    session.renew_keys(None).await.unwrap();

    admin.overwrite_keys(&alice, &Credential::from("D")).await.unwrap();
    let mut session = world.login("alice", "D").await.unwrap();
    session.renew_keys(None).await.unwrap();
    session
}

fn numbers(versions: impl IntoIterator<Item = KeyVersion>) -> Vec<u32> {
    versions.into_iter().map(KeyVersion::get).collect()
}

#[tokio::test]
async fn test_seven_version_history_locks_first_five() {
    init_tracing();
    let world = TestWorld::new();
    let session = seven_versions(&world).await;
    let alice = Login::from("alice");

    let locked = session.locked_versions(&alice).await.unwrap();
    assert_eq!(
        numbers(locked.iter().map(|l| l.public_key.version)),
        vec![1, 2, 3, 4, 5]
    );

    let history = session.public_key_history(&alice).await.unwrap();
    assert_eq!(numbers(history.iter().map(|k| k.version)), (1..=7).collect::<Vec<_>>());
    assert_eq!(locked[0].public_key, history[0]);
}

#[tokio::test]
async fn test_unlock_with_changed_credential_recovers_its_chain() {
    init_tracing();
    let world = TestWorld::new();
    let mut session = seven_versions(&world).await;
    let alice = Login::from("alice");

    let report = session
        .unlock_versions(&alice, &Credential::from("B"))
        .await
        .unwrap();
    assert_eq!(
        numbers(report.unlocked.iter().map(|k| k.version)),
        vec![1, 2, 3]
    );
    assert_eq!(numbers(report.still_locked.clone()), vec![4, 5]);
    assert_eq!(world.locked("alice").await, vec![4, 5]);

    let again = session
        .unlock_versions(&alice, &Credential::from("B"))
        .await
        .unwrap();
    assert!(again.unlocked.is_empty());
    assert_eq!(world.locked("alice").await, vec![4, 5]);
}

#[tokio::test]
async fn test_unlocked_versions_survive_login_and_renewal() {
    let world = TestWorld::new();
    let mut session = seven_versions(&world).await;
    let alice = Login::from("alice");
    session
        .unlock_versions(&alice, &Credential::from("B"))
        .await
        .unwrap();

    let mut relogged = world.login("alice", "D").await.unwrap();
    let held = relogged.snapshot().keychain.versions();
    assert_eq!(numbers(held), vec![1, 2, 3, 6, 7]);

    relogged.renew_keys(None).await.unwrap();
    assert_eq!(world.locked("alice").await, vec![4, 5]);
}

#[tokio::test]
async fn test_unlock_with_unknown_credential_is_not_an_error() {
    let world = TestWorld::new();
    let mut session = seven_versions(&world).await;

    let report = session
        .unlock_versions(&Login::from("alice"), &Credential::from("never used"))
        .await
        .unwrap();
    assert!(report.unlocked.is_empty());
    assert_eq!(numbers(report.still_locked), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_lock_transitions_are_audited() {
    let world = TestWorld::new();
    let alice = Login::from("alice");
    let mut session = world.register("alice", "A").await;
    world
        .admin()
        .overwrite_keys(&alice, &Credential::from("C"))
        .await
        .unwrap();

    let audit = world.authority.lock_audit(&alice).await.unwrap();
    let locking: Vec<_> = audit
        .iter()
        .filter(|t| t.to == VersionState::Locked)
        .map(|t| t.version.get())
        .collect();
    assert_eq!(locking, vec![1]);

    let err = session.unlock_versions(&alice, &Credential::from("A")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StaleKey);

    session = world.login("alice", "C").await.unwrap();
    session.unlock_versions(&alice, &Credential::from("A")).await.unwrap();
    let audit = world.authority.lock_audit(&alice).await.unwrap();
    assert_eq!(audit.last().map(|t| (t.version.get(), t.to)), Some((1, VersionState::Unlocked)));
}

#[tokio::test]
async fn test_rejected_unlock_changes_nothing() {
    init_tracing();
    let world = TestWorld::faulty(MemoryAuthority::new(), RekeyConfig::default());
    let alice = Login::from("alice");

    let mut session = world.register("alice", "A").await;
    session.renew_keys(None).await.unwrap();
    world
        .admin()
        .overwrite_keys(&alice, &Credential::from("C"))
        .await
        .unwrap();
    let mut session = world.login("alice", "C").await.unwrap();

    world.authority.fail_unlock_commits(1);
    assert!(session
        .unlock_versions(&alice, &Credential::from("A"))
        .await
        .is_err());

    // Lock table and derivation still agree.
    assert_eq!(world.locked("alice").await, vec![1, 2]);
    let fresh = world.login("alice", "C").await.unwrap();
    assert_eq!(numbers(fresh.snapshot().keychain.versions()), vec![3]);
    let history = world.authority.history(&alice).await.unwrap();
    assert!(history.links.iter().all(|l| l.kind != LinkKind::Unlock));

    let report = session
        .unlock_versions(&alice, &Credential::from("A"))
        .await
        .unwrap();
    assert_eq!(numbers(report.unlocked.iter().map(|k| k.version)), vec![1, 2]);
    assert!(world.locked("alice").await.is_empty());
    let fresh = world.login("alice", "C").await.unwrap();
    assert_eq!(numbers(fresh.snapshot().keychain.versions()), vec![1, 2, 3]);
}
