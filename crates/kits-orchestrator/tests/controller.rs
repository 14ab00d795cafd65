//! ---
//! dr_section: "06-testing-qa"
//! dr_subsection: "tests"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Kit controller classification, discovery and watch registration tests."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
mod support;

use kits_model::{Datacenter, MateId, MateStatus, ReplicationRole};
use kits_orchestrator::{KitError, WatchKey, WatchOutcome};
use kits_resilience::MateHealth;
use support::{auth, host, kit, Harness};

fn slot(dc: Datacenter, mate: MateId) -> String {
    host("alpha", dc, mate)
}

#[tokio::test(start_paused = true)]
async fn zero_active_mates_abort_without_watchers() {
    let h = Harness::new();
    for (dc, mate) in [
        (Datacenter::Dc1, MateId::Mate1),
        (Datacenter::Dc1, MateId::Mate2),
        (Datacenter::Dc2, MateId::Mate1),
    ] {
        h.broker.set_status(&slot(dc, mate), MateStatus::Standby);
    }

    let err = h.controller.run(&kit("alpha"), &auth()).await.unwrap_err();
    assert!(matches!(err, KitError::NoActiveMates { ref kit } if kit == "alpha"));
    assert!(h.registry.is_empty());
    assert!(h.broker.calls_matching("list").is_empty());
}

#[tokio::test(start_paused = true)]
async fn alpha_degraded_kit_watches_standby_vpns() {
    let h = Harness::new();
    let dc1m1 = slot(Datacenter::Dc1, MateId::Mate1);
    h.broker.set_status(&dc1m1, MateStatus::Active);
    h.broker
        .set_status(&slot(Datacenter::Dc1, MateId::Mate2), MateStatus::Standby);
    h.broker
        .set_status(&slot(Datacenter::Dc2, MateId::Mate1), MateStatus::Standby);
    h.broker
        .set_vpns(&dc1m1, ReplicationRole::Standby, &["orders"]);

    let plan = h.controller.plan(&kit("alpha"), &auth()).await.unwrap();
    assert_eq!(plan.health, MateHealth::Degraded);
    assert_eq!(plan.active.len(), 1);
    assert_eq!(plan.tasks.len(), 1);
    let task = &plan.tasks[0];
    assert_eq!(task.vpn, "orders");
    assert!(task.is_degraded());
    assert_eq!(task.standby_side.host, dc1m1);

    let outcome = h.controller.run(&kit("alpha"), &auth()).await.unwrap();
    assert_eq!(outcome.watched, vec![WatchKey::new("alpha", "orders")]);
    assert_eq!(h.registry.len(), 1);

    assert_eq!(h.registry.stop_all(), 1);
    let results = h.registry.join_all().await;
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].1, Ok(WatchOutcome::Stopped)));
}

#[tokio::test(start_paused = true)]
async fn healthy_kit_pairs_active_and_standby_owners() {
    let h = Harness::new();
    let dc1 = slot(Datacenter::Dc1, MateId::Mate1);
    let dc2 = slot(Datacenter::Dc2, MateId::Mate2);
    h.broker.set_status(&dc1, MateStatus::Active);
    h.broker
        .set_status(&slot(Datacenter::Dc1, MateId::Mate2), MateStatus::Standby);
    h.broker
        .set_status(&slot(Datacenter::Dc2, MateId::Mate1), MateStatus::Standby);
    h.broker.set_status(&dc2, MateStatus::Active);
    h.broker
        .set_vpns(&dc1, ReplicationRole::Active, &["orders", "billing"]);
    h.broker.set_vpns(&dc1, ReplicationRole::Standby, &["audit"]);
    h.broker.set_vpns(&dc2, ReplicationRole::Active, &["audit"]);
    h.broker.set_vpns(&dc2, ReplicationRole::Standby, &["orders"]);

    let plan = h.controller.plan(&kit("alpha"), &auth()).await.unwrap();
    assert_eq!(plan.health, MateHealth::Healthy);
    assert_eq!(plan.skipped, vec!["billing".to_owned()]);

    let summary: Vec<(String, String, String)> = plan
        .tasks
        .iter()
        .map(|task| {
            (
                task.vpn.clone(),
                task.active_side.as_ref().unwrap().host.clone(),
                task.standby_side.host.clone(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("audit".to_owned(), dc2.clone(), dc1.clone()),
            ("orders".to_owned(), dc1.clone(), dc2.clone()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn two_active_mates_in_one_datacenter_are_ambiguous() {
    let h = Harness::new();
    h.broker
        .set_status(&slot(Datacenter::Dc1, MateId::Mate1), MateStatus::Active);
    h.broker
        .set_status(&slot(Datacenter::Dc1, MateId::Mate2), MateStatus::Active);

    let err = h.controller.run(&kit("alpha"), &auth()).await.unwrap_err();
    match err {
        KitError::AmbiguousActiveSet { active, datacenters, .. } => {
            assert_eq!(active.len(), 2);
            assert_eq!(datacenters, vec![Datacenter::Dc1]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn degraded_kit_without_standby_vpns_is_skipped() {
    let h = Harness::new();
    h.broker
        .set_status(&slot(Datacenter::Dc2, MateId::Mate1), MateStatus::Active);
    h.broker.set_vpns(
        &slot(Datacenter::Dc2, MateId::Mate1),
        ReplicationRole::Active,
        &["orders"],
    );

    let outcome = h.controller.run(&kit("alpha"), &auth()).await.unwrap();
    assert_eq!(outcome.health, MateHealth::Degraded);
    assert!(outcome.watched.is_empty());
    assert_eq!(outcome.active.len(), 1);
    assert!(h.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn conflicting_owners_fail_the_kit() {
    let h = Harness::new();
    let dc1 = slot(Datacenter::Dc1, MateId::Mate1);
    let dc2 = slot(Datacenter::Dc2, MateId::Mate1);
    h.broker.set_status(&dc1, MateStatus::Active);
    h.broker.set_status(&dc2, MateStatus::Active);
    h.broker.set_vpns(&dc1, ReplicationRole::Active, &["orders"]);
    h.broker.set_vpns(&dc2, ReplicationRole::Active, &["orders"]);

    let err = h.controller.run(&kit("alpha"), &auth()).await.unwrap_err();
    assert!(matches!(err, KitError::RoleMap { .. }));
    assert!(h.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn probes_are_attempted_once() {
    let h = Harness::new();
    h.broker
        .set_status(&slot(Datacenter::Dc1, MateId::Mate1), MateStatus::Active);

    let results = h.controller.probe_mates(&kit("alpha"), &auth()).await;
    assert_eq!(results.len(), 1);
    assert_eq!(h.broker.calls_matching("probe").len(), 4);
}

#[tokio::test(start_paused = true)]
async fn rerunning_a_kit_keeps_existing_watches() {
    let h = Harness::new();
    let dc1m1 = slot(Datacenter::Dc1, MateId::Mate1);
    h.broker.set_status(&dc1m1, MateStatus::Active);
    h.broker
        .set_vpns(&dc1m1, ReplicationRole::Standby, &["orders"]);

    let first = h.controller.run(&kit("alpha"), &auth()).await.unwrap();
    let second = h.controller.run(&kit("alpha"), &auth()).await.unwrap();
    assert_eq!(first.watched.len(), 1);
    assert!(second.watched.is_empty());
    assert_eq!(h.registry.len(), 1);

    h.registry.stop_kit("alpha");
    h.registry.join_all().await;
}
