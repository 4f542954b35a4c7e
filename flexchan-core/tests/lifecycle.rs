//! End-to-end lifecycle tests against the in-process platform.
//!
//! Covers:
//! - group creation and deletion (including the registry filter regression)
//! - spawn on lobby join, naming, capacity, relocation
//! - reclaim on empty, lobby never reclaimed
//! - announcements through recruiting / full / closed
//! - concurrent joins serialized per workspace
//! - stale references, failed moves, spawn cap, vanished rooms
//! - unknown occupancy never reclaims
//! - startup reconciliation and the listener loop, including shutdown

use std::sync::Arc;

use flexchan_core::announce::RecruitState;
use flexchan_core::listener;
use flexchan_core::manager::{ReconcileReport, MAX_LIMIT};
use flexchan_core::sim::SimPlatform;
use flexchan_core::store::{MemoryStore, RegistryStore};
use flexchan_core::{Action, ChannelGroup, FlexError, GroupOptions, LifecycleManager, MembershipChange};

const WS: &str = "W1";

struct Harness {
    sim: Arc<SimPlatform>,
    store: Arc<MemoryStore>,
    manager: Arc<LifecycleManager>,
}

fn harness() -> Harness {
    let sim = Arc::new(SimPlatform::new());
    sim.add_workspace(WS);
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(LifecycleManager::new(store.clone(), sim.clone(), sim.clone()));
    Harness { sim, store, manager }
}

/// Handle `change`, then every follow-up notification it caused.
async fn deliver(h: &Harness, change: MembershipChange) -> Vec<Action> {
    let actions = h.manager.on_member_moved(&change).await.unwrap();
    settle(h).await;
    actions
}

async fn settle(h: &Harness) {
    loop {
        let followups = h.sim.drain_followups();
        if followups.is_empty() {
            break;
        }
        for change in followups {
            h.manager.on_member_moved(&change).await.unwrap();
        }
    }
}

async fn records(h: &Harness) -> Vec<ChannelGroup> {
    h.manager.registry().get(WS).await.unwrap()
}

async fn spawned_ids(h: &Harness) -> Vec<String> {
    records(h).await[0]
        .spawned_rooms
        .iter()
        .map(|r| r.channel_id.clone())
        .collect()
}

async fn lounge(h: &Harness, capacity: u32) -> ChannelGroup {
    h.manager
        .create_group(WS, GroupOptions::named("Lounge").with_capacity(capacity))
        .await
        .unwrap()
}

#[tokio::test]
async fn create_registers_empty_record() {
    let h = harness();
    let a = lounge(&h, 3).await;
    let b = h.manager.create_group(WS, GroupOptions::named("Games")).await.unwrap();

    let all = records(&h).await;
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|r| r.spawned_rooms.is_empty()));
    assert_ne!(a.lobby_channel_id, b.lobby_channel_id);
    assert_eq!(a.capacity, Some(3));
    assert_eq!(h.sim.room_names_in(&a.group_id), vec!["Join to create - Lounge"]);
    assert!(h.sim.group_exists(&b.group_id));
}

#[tokio::test]
async fn create_rejects_blank_name_and_unknown_workspace() {
    let h = harness();
    let err = h.manager.create_group(WS, GroupOptions::named("  ")).await.unwrap_err();
    assert!(matches!(err, FlexError::InvalidRequest(_)));

    let err = h.manager.create_group("W404", GroupOptions::named("Lounge")).await.unwrap_err();
    assert!(matches!(err, FlexError::Platform(_)));
    assert!(h.store.get("W404").await.unwrap().is_none());
}

#[tokio::test]
async fn zero_capacity_means_unlimited() {
    let h = harness();
    let record = h
        .manager
        .create_group(WS, GroupOptions::named("Open").with_capacity(0).with_max_spawned(0))
        .await
        .unwrap();
    assert_eq!(record.capacity, None);
    assert_eq!(record.max_spawned, None);
}

#[tokio::test]
async fn create_rejects_limits_above_99() {
    let h = harness();
    let err = h
        .manager
        .create_group(WS, GroupOptions::named("Big").with_capacity(150))
        .await
        .unwrap_err();
    assert!(matches!(err, FlexError::InvalidRequest(ref m) if m.contains("capacity")));

    let err = h
        .manager
        .create_group(WS, GroupOptions::named("Big").with_max_spawned(MAX_LIMIT + 1))
        .await
        .unwrap_err();
    assert!(matches!(err, FlexError::InvalidRequest(ref m) if m.contains("maxSpawned")));
    assert!(records(&h).await.is_empty());

    let record = h
        .manager
        .create_group(WS, GroupOptions::named("Big").with_capacity(MAX_LIMIT).with_max_spawned(MAX_LIMIT))
        .await
        .unwrap();
    assert_eq!(record.capacity, Some(99));
}

#[tokio::test]
async fn join_lobby_spawns_and_relocates() {
    let h = harness();
    let record = lounge(&h, 3).await;

    let change = h.sim.connect(WS, "U1", &record.lobby_channel_id);
    let actions = deliver(&h, change).await;

    let rooms = spawned_ids(&h).await;
    assert_eq!(rooms.len(), 1);
    assert_eq!(
        actions,
        vec![Action::Spawned {
            lobby: record.lobby_channel_id.clone(),
            room: rooms[0].clone(),
        }]
    );
    assert_eq!(h.sim.member_room(WS, "U1").as_deref(), Some(rooms[0].as_str()));
    assert_eq!(h.sim.room_name(&rooms[0]).as_deref(), Some("Lounge-1"));
    assert_eq!(h.sim.room_capacity(&rooms[0]), Some(3));
    // Lobby is still there even though it is empty again.
    assert!(h.sim.room_exists(&record.lobby_channel_id));
}

#[tokio::test]
async fn concurrent_joins_get_separate_rooms() {
    let h = harness();
    let record = lounge(&h, 3).await;

    let c1 = h.sim.connect(WS, "U1", &record.lobby_channel_id);
    let c2 = h.sim.connect(WS, "U2", &record.lobby_channel_id);
    let (m1, m2) = (Arc::clone(&h.manager), Arc::clone(&h.manager));
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { m1.on_member_moved(&c1).await }),
        tokio::spawn(async move { m2.on_member_moved(&c2).await }),
    );
    r1.unwrap().unwrap();
    r2.unwrap().unwrap();
    settle(&h).await;

    let rooms = spawned_ids(&h).await;
    assert_eq!(rooms.len(), 2);
    assert_ne!(rooms[0], rooms[1]);
    assert_eq!(
        h.sim.room_names_in(&record.group_id),
        vec!["Join to create - Lounge", "Lounge-1", "Lounge-2"]
    );
    assert_ne!(h.sim.member_room(WS, "U1"), h.sim.member_room(WS, "U2"));
}

#[tokio::test]
async fn last_leave_reclaims_room() {
    let h = harness();
    let record = lounge(&h, 3).await;
    let join = h.sim.connect(WS, "U1", &record.lobby_channel_id);
    deliver(&h, join).await;
    let room = spawned_ids(&h).await.remove(0);

    let leave = h.sim.disconnect(WS, "U1");
    let actions = deliver(&h, leave).await;

    assert_eq!(
        actions,
        vec![Action::Reclaimed {
            room: room.clone(),
            announcement_closed: false,
        }]
    );
    assert!(!h.sim.room_exists(&room));
    assert!(spawned_ids(&h).await.is_empty());
}

#[tokio::test]
async fn lobby_is_never_reclaimed() {
    let h = harness();
    let record = lounge(&h, 3).await;
    let lobby = record.lobby_channel_id.clone();

    // Connect and leave the lobby directly, with no spawn in between.
    h.sim.connect(WS, "U1", &lobby);
    let actions = deliver(&h, MembershipChange::left(WS, "U1", &lobby)).await;
    h.sim.disconnect(WS, "U1");

    assert!(actions.is_empty());
    assert!(h.sim.room_exists(&lobby));
    assert_eq!(records(&h).await.len(), 1);
}

#[tokio::test]
async fn announcement_follows_occupancy() {
    let h = harness();
    let text = h.sim.add_text_channel();
    let record = h
        .manager
        .create_group(WS, GroupOptions::named("Lounge").with_capacity(2).with_announcements(&text))
        .await
        .unwrap();

    let join = h.sim.connect(WS, "U1", &record.lobby_channel_id);
    deliver(&h, join).await;
    let entry = records(&h).await[0].spawned_rooms[0].clone();
    let message_id = entry.announcement_message_id.clone().unwrap();
    let message = h.sim.message(&message_id).unwrap();
    assert_eq!(message.destination_id, text);
    assert_eq!(message.announcement.state, RecruitState::Recruiting { remaining: Some(1) });
    assert_eq!(message.announcement.content(), "Lounge recruiting! (@1)");

    // A second member walks straight into the spawned room.
    let actions = deliver(&h, h.sim.connect(WS, "U2", &entry.channel_id)).await;
    assert_eq!(
        actions,
        vec![Action::Refreshed {
            room: entry.channel_id.clone(),
            updated: true,
        }]
    );
    assert_eq!(h.sim.message(&message_id).unwrap().announcement.state, RecruitState::Full);

    deliver(&h, h.sim.disconnect(WS, "U2")).await;
    let message = h.sim.message(&message_id).unwrap();
    assert_eq!(message.announcement.state, RecruitState::Recruiting { remaining: Some(1) });
    assert_eq!(message.announcement.occupancy_label().as_deref(), Some("1 / 2"));

    let actions = deliver(&h, h.sim.disconnect(WS, "U1")).await;
    assert_eq!(
        actions,
        vec![Action::Reclaimed {
            room: entry.channel_id.clone(),
            announcement_closed: true,
        }]
    );
    let message = h.sim.message(&message_id).unwrap();
    assert_eq!(message.announcement.state, RecruitState::Closed);
    // Closed, not deleted.
    assert_eq!(h.sim.message_count(), 1);
}

#[tokio::test]
async fn locked_announcement_does_not_block_reclaim() {
    let h = harness();
    let text = h.sim.add_text_channel();
    let record = h
        .manager
        .create_group(WS, GroupOptions::named("Lounge").with_announcements(&text))
        .await
        .unwrap();
    deliver(&h, h.sim.connect(WS, "U1", &record.lobby_channel_id)).await;
    let entry = records(&h).await[0].spawned_rooms[0].clone();
    h.sim.lock_message(entry.announcement_message_id.as_deref().unwrap());

    let actions = deliver(&h, h.sim.disconnect(WS, "U1")).await;
    assert_eq!(
        actions,
        vec![Action::Reclaimed {
            room: entry.channel_id.clone(),
            announcement_closed: false,
        }]
    );
    assert!(spawned_ids(&h).await.is_empty());
}

#[tokio::test]
async fn missing_announcement_target_spawns_without_message() {
    let h = harness();
    let record = h
        .manager
        .create_group(WS, GroupOptions::named("Lounge").with_announcements("text-404"))
        .await
        .unwrap();
    deliver(&h, h.sim.connect(WS, "U1", &record.lobby_channel_id)).await;

    let entry = records(&h).await[0].spawned_rooms[0].clone();
    assert_eq!(entry.announcement_message_id, None);
    assert_eq!(h.sim.message_count(), 0);
}

#[tokio::test]
async fn moving_between_rooms_refreshes_then_reclaims() {
    let h = harness();
    let record = lounge(&h, 5).await;
    deliver(&h, h.sim.connect(WS, "U1", &record.lobby_channel_id)).await;
    deliver(&h, h.sim.connect(WS, "U2", &record.lobby_channel_id)).await;
    let rooms = spawned_ids(&h).await;
    let (a, b) = (rooms[0].clone(), rooms[1].clone());

    let actions = deliver(&h, h.sim.connect(WS, "U1", &b)).await;
    assert_eq!(
        actions,
        vec![
            Action::Refreshed { room: b.clone(), updated: false },
            Action::Reclaimed { room: a.clone(), announcement_closed: false },
        ]
    );
    assert_eq!(spawned_ids(&h).await, vec![b]);
}

#[tokio::test]
async fn repeated_join_converges_to_one_room() {
    let h = harness();
    let record = lounge(&h, 3).await;
    let join = h.sim.connect(WS, "U1", &record.lobby_channel_id);

    deliver(&h, join.clone()).await;
    let first = spawned_ids(&h).await;
    // Redelivery spawns a fresh room and moves the member on; the room they
    // left empties and is reclaimed.
    let actions = deliver(&h, join).await;
    assert!(matches!(actions.as_slice(), [Action::Spawned { .. }]));

    let rooms = spawned_ids(&h).await;
    assert_eq!(rooms.len(), 1);
    assert_ne!(rooms, first);
    assert_eq!(h.sim.member_room(WS, "U1").as_deref(), Some(rooms[0].as_str()));
}

#[tokio::test]
async fn spawn_cap_keeps_member_in_lobby() {
    let h = harness();
    let record = h
        .manager
        .create_group(WS, GroupOptions::named("Lounge").with_max_spawned(1))
        .await
        .unwrap();
    deliver(&h, h.sim.connect(WS, "U1", &record.lobby_channel_id)).await;

    let actions = deliver(&h, h.sim.connect(WS, "U2", &record.lobby_channel_id)).await;
    assert_eq!(
        actions,
        vec![Action::SpawnCapped {
            lobby: record.lobby_channel_id.clone()
        }]
    );
    assert_eq!(spawned_ids(&h).await.len(), 1);
    assert_eq!(
        h.sim.member_room(WS, "U2").as_deref(),
        Some(record.lobby_channel_id.as_str())
    );
}

#[tokio::test]
async fn stale_group_fails_spawn_without_registry_change() {
    let h = harness();
    let record = lounge(&h, 3).await;
    h.sim.remove_group_out_of_band(&record.group_id);
    let writes = h.store.write_count();

    let change = h.sim.connect(WS, "U1", &record.lobby_channel_id);
    let err = h.manager.on_member_moved(&change).await.unwrap_err();

    assert!(matches!(err, FlexError::StaleReference(_)));
    assert_eq!(h.store.write_count(), writes);
    assert!(spawned_ids(&h).await.is_empty());
}

#[tokio::test]
async fn failed_move_removes_new_room() {
    let h = harness();
    let record = lounge(&h, 3).await;
    h.sim.fail_moves(true);

    let change = h.sim.connect(WS, "U1", &record.lobby_channel_id);
    let err = h.manager.on_member_moved(&change).await.unwrap_err();

    assert!(matches!(err, FlexError::Platform(_)));
    assert_eq!(h.sim.room_names_in(&record.group_id), vec!["Join to create - Lounge"]);
    assert!(spawned_ids(&h).await.is_empty());
}

#[tokio::test]
async fn vanished_room_is_pruned_on_leave() {
    let h = harness();
    let record = lounge(&h, 3).await;
    deliver(&h, h.sim.connect(WS, "U1", &record.lobby_channel_id)).await;
    let room = spawned_ids(&h).await.remove(0);

    h.sim.remove_room_out_of_band(&room);
    let actions = deliver(&h, MembershipChange::left(WS, "U1", &room)).await;

    assert_eq!(actions, vec![Action::Pruned { room }]);
    assert!(spawned_ids(&h).await.is_empty());
}

#[tokio::test]
async fn leave_with_unknown_occupancy_keeps_room() {
    let h = harness();
    let record = lounge(&h, 3).await;
    deliver(&h, h.sim.connect(WS, "U1", &record.lobby_channel_id)).await;
    let room = spawned_ids(&h).await.remove(0);

    h.sim.blind_occupancy(WS, true);
    let actions = deliver(&h, h.sim.disconnect(WS, "U1")).await;

    assert!(actions.is_empty());
    assert!(h.sim.room_exists(&room));
    assert_eq!(spawned_ids(&h).await, vec![room]);
}

#[tokio::test]
async fn unmanaged_rooms_are_ignored() {
    let h = harness();
    // No records at all.
    let actions = deliver(&h, MembershipChange::joined(WS, "U1", "room-x")).await;
    assert!(actions.is_empty());

    lounge(&h, 3).await;
    let actions = deliver(&h, MembershipChange::moved(WS, "U1", "room-x", "room-y")).await;
    assert!(actions.is_empty());
    assert!(spawned_ids(&h).await.is_empty());
}

#[tokio::test]
async fn delete_removes_record_and_rooms() {
    let h = harness();
    let keep = h.manager.create_group(WS, GroupOptions::named("Games")).await.unwrap();
    let record = lounge(&h, 3).await;
    deliver(&h, h.sim.connect(WS, "U1", &record.lobby_channel_id)).await;
    let room = records(&h).await[1].spawned_rooms[0].channel_id.clone();

    let removed = h
        .manager
        .delete_group(WS, &record.lobby_channel_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(removed.name, "Lounge");

    let left = records(&h).await;
    assert_eq!(left, vec![keep]);
    assert!(!h.sim.room_exists(&room));
    assert!(!h.sim.room_exists(&record.lobby_channel_id));
    assert!(!h.sim.group_exists(&record.group_id));
}

#[tokio::test]
async fn delete_unknown_lobby_is_not_managed() {
    let h = harness();
    lounge(&h, 3).await;
    assert!(h.manager.delete_group(WS, "room-404").await.unwrap().is_none());
    assert_eq!(records(&h).await.len(), 1);
}

#[tokio::test]
async fn delete_with_stale_lobby_keeps_record() {
    let h = harness();
    let record = lounge(&h, 3).await;
    h.sim.remove_room_out_of_band(&record.lobby_channel_id);

    let err = h
        .manager
        .delete_group(WS, &record.lobby_channel_id)
        .await
        .unwrap_err();
    assert!(matches!(err, FlexError::StaleReference(_)));
    assert_eq!(records(&h).await, vec![record]);
}

#[tokio::test]
async fn reconcile_sweeps_missed_changes() {
    let h = harness();
    let record = lounge(&h, 3).await;
    for member in ["U1", "U2", "U3"] {
        deliver(&h, h.sim.connect(WS, member, &record.lobby_channel_id)).await;
    }
    let rooms = spawned_ids(&h).await;

    // Changes that happen while nobody is listening.
    h.sim.disconnect(WS, "U1");
    h.sim.remove_room_out_of_band(&rooms[1]);

    let report = h.manager.reconcile(WS).await.unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            reclaimed: 1,
            pruned: 1,
            refreshed: 0,
            stale: 0,
            deferred: 0,
        }
    );
    assert_eq!(spawned_ids(&h).await, vec![rooms[2].clone()]);
    assert!(!h.sim.room_exists(&rooms[0]));
}

#[tokio::test]
async fn reconcile_defers_rooms_with_unknown_occupancy() {
    let h = harness();
    let record = lounge(&h, 3).await;
    for member in ["U1", "U2"] {
        deliver(&h, h.sim.connect(WS, member, &record.lobby_channel_id)).await;
    }
    let rooms = spawned_ids(&h).await;

    // Fresh start: nobody has told us who is connected yet.
    h.sim.blind_occupancy(WS, true);
    h.sim.remove_room_out_of_band(&rooms[1]);

    let report = h.manager.reconcile(WS).await.unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            pruned: 1,
            deferred: 1,
            ..ReconcileReport::default()
        }
    );
    assert!(h.sim.room_exists(&rooms[0]));
    assert_eq!(spawned_ids(&h).await, vec![rooms[0].clone()]);

    // Once occupancy is known the same sweep keeps the occupied room.
    h.sim.blind_occupancy(WS, false);
    let report = h.manager.reconcile(WS).await.unwrap();
    assert_eq!(report.deferred, 0);
    assert_eq!(report.reclaimed, 0);
    assert!(h.sim.room_exists(&rooms[0]));
}

#[tokio::test]
async fn reconcile_skips_stale_groups() {
    let h = harness();
    let record = lounge(&h, 3).await;
    h.sim.remove_group_out_of_band(&record.group_id);

    let report = h.manager.reconcile(WS).await.unwrap();
    assert_eq!(report.stale, 1);
    assert_eq!(records(&h).await, vec![record]);
}

#[tokio::test]
async fn listener_handles_feed_until_closed() {
    let h = harness();
    let record = lounge(&h, 3).await;
    let stale = h.manager.create_group(WS, GroupOptions::named("Gone")).await.unwrap();
    h.sim.remove_group_out_of_band(&stale.group_id);

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let task = tokio::spawn(listener::run(Arc::clone(&h.manager), rx));

    tx.send(h.sim.connect(WS, "U1", &record.lobby_channel_id)).await.unwrap();
    tx.send(h.sim.connect(WS, "U2", &record.lobby_channel_id)).await.unwrap();
    tx.send(h.sim.connect(WS, "U3", &stale.lobby_channel_id)).await.unwrap();
    drop(tx);

    let stats = task.await.unwrap();
    assert_eq!(stats.handled, 3);
    assert_eq!(stats.failed, 1);

    let lounge_rooms = &records(&h).await[0].spawned_rooms;
    assert_eq!(lounge_rooms.len(), 2);
}

#[tokio::test]
async fn listener_shutdown_drains_queued_changes() {
    let h = harness();
    let record = lounge(&h, 5).await;

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    for member in ["U1", "U2", "U3"] {
        tx.send(h.sim.connect(WS, member, &record.lobby_channel_id)).await.unwrap();
    }
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let task = tokio::spawn(listener::run_until(Arc::clone(&h.manager), rx, async {
        let _ = stop_rx.await;
    }));
    stop_tx.send(()).unwrap();

    // The sender is still alive; shutdown alone ends the loop.
    let stats = task.await.unwrap();
    assert_eq!(stats.handled, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(spawned_ids(&h).await.len(), 3);
    assert!(tx.send(MembershipChange::left(WS, "U1", "x")).await.is_err());
}
