//! Registration scenarios: new accounts, re-registration over a live
//! account, and re-registration of a recently deleted account.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use chrono::TimeZone;
use common::{attributes, register};
use courier_accounts::collaborators::{Clock, PniDirectory};
use courier_store::TombstoneStore;
use courier_test_utils::{DirectoryEvent, HarnessOptions, TestHarness};
use courier_types::{start_of_utc_day, AccountBadge, Aci, DeviceId, GateConfig};

#[tokio::test]
async fn test_new_registration() {
    let harness = TestHarness::new();

    let account = harness
        .manager
        .create("+15550100", "pw", Some("agent"), &attributes(), Vec::new())
        .await
        .unwrap();

    assert!(!account.aci().is_nil());
    assert_eq!(account.number(), "+15550100");

    // The PNI came from the directory, which always re-answers the same way.
    let pni = harness.pni_directory.pni_for("+15550100").await.unwrap();
    assert_eq!(account.pni(), pni);

    // One write-through covering the body and both live secondary keys (no
    // username yet).
    assert_eq!(harness.cache_backend.len(), 3);

    // Pending verification dropped.
    assert_eq!(harness.pending_accounts.removed(), vec!["+15550100".to_string()]);

    // No residue clearing for a genuinely new account.
    assert!(harness.keys.deleted().is_empty());
    assert!(harness.messages.cleared().is_empty());
    assert!(harness.profiles.deleted().is_empty());

    // The primary device carries the registration payload.
    let device = account.primary_device().unwrap();
    assert_eq!(device.id, DeviceId::PRIMARY);
    assert_eq!(device.registration_id, 42);
    assert!(device.fetches_messages);
    assert_eq!(device.user_agent.as_deref(), Some("agent"));
    assert!(device.credentials.verify("pw"));
    assert_eq!(device.last_seen, start_of_utc_day(harness.clock.now()));

    assert_eq!(harness.store.len(), 1);
}

#[tokio::test]
async fn test_re_registration_of_live_account() {
    let harness = TestHarness::new();
    let original = register(&harness, "+15550100").await;

    let taken_over = harness
        .manager
        .create("+15550100", "pw2", None, &attributes(), Vec::new())
        .await
        .unwrap();

    // The stored identity survives the takeover.
    assert_eq!(taken_over.aci(), original.aci());
    assert_eq!(harness.store.len(), 1);

    // The displaced registration's residue is cleared exactly once, for the
    // ACI only.
    let aci = original.aci().as_uuid();
    assert_eq!(harness.messages.clears_for(aci), 1);
    assert_eq!(harness.keys.deletions_for(aci), 1);
    assert_eq!(harness.keys.deleted(), vec![aci]);
    assert_eq!(harness.profiles.deleted(), vec![original.aci()]);

    // The record now carries the new credentials.
    let stored = harness
        .manager
        .get_by_aci(original.aci())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.primary_device().unwrap().credentials.verify("pw2"));
}

#[tokio::test]
async fn test_re_registration_invalidates_the_displaced_username() {
    let harness = TestHarness::new();
    let original = register(&harness, "+15550100").await;
    let named = harness
        .manager
        .set_username(&original, "kirk")
        .await
        .unwrap();

    // Warm the cache so the username mapping is definitely present.
    assert!(harness
        .manager
        .get_by_username("kirk")
        .await
        .unwrap()
        .is_some());

    harness
        .manager
        .create("+15550100", "pw2", None, &attributes(), Vec::new())
        .await
        .unwrap();

    // The takeover dropped the username; neither the cache nor the store
    // may still resolve it to the account.
    assert!(harness
        .manager
        .get_by_username("kirk")
        .await
        .unwrap()
        .is_none());
    let stored = harness
        .manager
        .get_by_aci(named.aci())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.username(), None);
}

#[tokio::test]
async fn test_re_registration_of_recently_deleted_account() {
    let harness = TestHarness::new();
    let tombstoned = Aci::random();
    harness
        .tombstones
        .put("+15550100", tombstoned, Duration::from_secs(60))
        .await
        .unwrap();

    let account = register(&harness, "+15550100").await;

    // The tombstoned identity is reclaimed, and nothing needed clearing:
    // deletion already did.
    assert_eq!(account.aci(), tombstoned);
    assert!(harness.keys.deleted().is_empty());
    assert!(harness.messages.cleared().is_empty());
    assert!(harness.profiles.deleted().is_empty());

    // The tombstone was consumed.
    assert_eq!(harness.tombstones.peek("+15550100").await.unwrap(), None);
}

#[tokio::test]
async fn test_expired_tombstone_is_not_reclaimed() {
    let harness = TestHarness::with_options(HarnessOptions {
        gate: GateConfig::tight(),
        ..HarnessOptions::default()
    });

    let tombstoned = Aci::random();
    harness
        .tombstones
        .put("+15550100", tombstoned, Duration::from_millis(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let account = register(&harness, "+15550100").await;
    assert_ne!(account.aci(), tombstoned);
}

#[tokio::test]
async fn test_discoverability_opt_out_notifies_directory() {
    let harness = TestHarness::new();

    let mut attrs = attributes();
    attrs.discoverable_by_phone_number = false;

    let account = harness
        .manager
        .create("+15550100", "pw", None, &attrs, Vec::new())
        .await
        .unwrap();

    assert_eq!(
        harness.directory_queue.events(),
        vec![DirectoryEvent::Delete(account.aci())]
    );
}

#[tokio::test]
async fn test_discoverable_registration_sends_nothing_to_directory() {
    let harness = TestHarness::new();
    register(&harness, "+15550100").await;
    assert!(harness.directory_queue.events().is_empty());
}

#[tokio::test]
async fn test_badges_are_stamped_at_the_clock() {
    let harness = TestHarness::new();
    let now = harness.clock.now();

    let badges = vec![
        AccountBadge {
            id: "donor".into(),
            expiration: now + chrono::Duration::days(30),
            visible: true,
        },
        AccountBadge {
            id: "lapsed".into(),
            expiration: chrono::Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            visible: true,
        },
    ];

    let account = harness
        .manager
        .create("+15550100", "pw", None, &attributes(), badges)
        .await
        .unwrap();

    assert_eq!(account.badges.len(), 1);
    assert_eq!(account.badges[0].id, "donor");
}

#[tokio::test]
async fn test_two_registrations_get_distinct_identifiers() {
    let harness = TestHarness::new();

    let a = register(&harness, "+15550100").await;
    let b = register(&harness, "+15550200").await;

    assert_ne!(a.aci(), b.aci());
    assert_ne!(a.pni(), b.pni());
    assert_eq!(harness.store.len(), 2);
}
