use super::*;
use crate::testing::{FakeApi, FakeChannel};
use tether_core::message::{ClientMessage, NoticeLevel, ServerMessage, ServerStatus};

struct Harness {
    session: Session,
    channel: Arc<FakeChannel>,
    api: Arc<FakeApi>,
    updates: mpsc::UnboundedReceiver<SessionUpdate>,
}

fn harness(user: &str, plan: &str, devices: &[(&str, bool)]) -> Harness {
    let channel = Arc::new(FakeChannel::default());
    let api = Arc::new(FakeApi::with_devices(devices));
    let account = AccountConfig {
        user_id: user.to_string(),
        plan: plan.to_string(),
        api_token: String::new(),
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new(
        channel.clone(),
        api.clone(),
        &account,
        &RosterConfig::default(),
        tx,
    );
    Harness {
        session,
        channel,
        api,
        updates: rx,
    }
}

fn status(raw: &str) -> Option<ChannelEvent> {
    Some(ChannelEvent::Message(ServerMessage::Status(
        ServerStatus::parse(raw),
    )))
}

fn qr(code: &str) -> Option<ChannelEvent> {
    Some(ChannelEvent::Message(ServerMessage::Qr(code.to_string())))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SessionUpdate>) -> Vec<SessionUpdate> {
    let mut out = Vec::new();
    while let Ok(update) = rx.try_recv() {
        out.push(update);
    }
    out
}

fn states(updates: &[SessionUpdate]) -> Vec<PairingState> {
    updates
        .iter()
        .filter_map(|u| match u {
            SessionUpdate::State(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

fn notices(updates: &[SessionUpdate]) -> Vec<Notice> {
    updates
        .iter()
        .filter_map(|u| match u {
            SessionUpdate::Notice(n) => Some(n.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_start_opens_channel_and_loads_roster() {
    let mut h = harness("user-1", "Free", &[("a", false)]);
    h.session.start().await;

    assert_eq!(h.channel.opened(), vec!["user-1".to_string()]);
    assert_eq!(h.session.state(), &PairingState::Idle);
    assert_eq!(h.api.list_calls(), 1);
    assert_eq!(h.session.roster().len(), 1);

    let updates = drain(&mut h.updates);
    assert_eq!(
        states(&updates),
        vec![PairingState::UserUnresolved, PairingState::Idle]
    );
    assert!(updates
        .iter()
        .any(|u| matches!(u, SessionUpdate::Roster { stale: false, .. })));
}

#[tokio::test]
async fn test_start_without_user_keeps_pairing_disabled() {
    let mut h = harness("", "Free", &[]);
    h.session.start().await;

    assert!(h.channel.opened().is_empty());
    assert_eq!(h.session.state(), &PairingState::UserUnresolved);

    h.session.on_command(SessionCommand::Pair).await;
    assert!(h.channel.emitted().is_empty());
    let updates = drain(&mut h.updates);
    assert!(notices(&updates)
        .iter()
        .all(|n| n.level == NoticeLevel::Error));
}

#[tokio::test]
async fn test_switch_user_reopens_channel() {
    let mut h = harness("", "Free", &[]);
    h.session.start().await;

    h.session
        .on_command(SessionCommand::SwitchUser("user-7".into()))
        .await;
    assert_eq!(h.channel.opened(), vec!["user-7".to_string()]);
    assert_eq!(h.session.state(), &PairingState::Idle);

    h.session
        .on_command(SessionCommand::SwitchUser("user-8".into()))
        .await;
    assert_eq!(
        h.channel.opened(),
        vec!["user-7".to_string(), "user-8".to_string()]
    );
    assert_eq!(h.channel.closes(), 1);
}

#[tokio::test]
async fn test_basic_plan_under_limit_sends_one_connect_request() {
    let mut h = harness("user-1", "Basic", &[("a", true), ("b", true)]);
    h.session.start().await;
    drain(&mut h.updates);

    assert!(!h.session.at_limit());
    h.session.on_command(SessionCommand::Pair).await;

    assert_eq!(h.session.state(), &PairingState::Connecting);
    assert_eq!(
        h.channel.emitted(),
        vec![ClientMessage::ConnectRequest {
            user_id: "user-1".into()
        }]
    );
    assert_eq!(states(&drain(&mut h.updates)), vec![PairingState::Connecting]);
}

#[tokio::test]
async fn test_at_limit_pair_request_is_gated() {
    let mut h = harness("user-1", "Free", &[("a", true)]);
    h.session.start().await;

    assert!(h.session.at_limit());
    h.session.on_command(SessionCommand::Pair).await;
    h.session.on_command(SessionCommand::Pair).await;

    assert_eq!(h.session.state(), &PairingState::LimitReached);
    assert!(h.channel.emitted().is_empty());
}

#[tokio::test]
async fn test_removing_device_frees_the_slot() {
    let mut h = harness("user-1", "Free", &[("a", true)]);
    h.session.start().await;
    h.session.on_command(SessionCommand::Pair).await;
    assert_eq!(h.session.state(), &PairingState::LimitReached);

    h.session
        .on_command(SessionCommand::Remove("a".into()))
        .await;
    assert_eq!(h.session.state(), &PairingState::Idle);
    assert!(!h.session.at_limit());

    h.session.on_command(SessionCommand::Pair).await;
    assert_eq!(h.session.state(), &PairingState::Connecting);
    assert_eq!(h.channel.emitted().len(), 1);
}

#[tokio::test]
async fn test_waiting_code_is_displayed() {
    let mut h = harness("user-1", "Basic", &[]);
    h.session.start().await;
    h.session.on_command(SessionCommand::Pair).await;
    drain(&mut h.updates);

    h.session.on_channel_event(status("waiting_qr")).await;
    assert_eq!(h.session.state(), &PairingState::Connecting);
    h.session.on_channel_event(qr("ABC123")).await;

    assert_eq!(
        h.session.state(),
        &PairingState::WaitingForCode {
            code: "ABC123".into()
        }
    );
    assert_eq!(
        states(&drain(&mut h.updates)),
        vec![PairingState::WaitingForCode {
            code: "ABC123".into()
        }]
    );
}

#[tokio::test]
async fn test_connected_schedules_one_refresh() {
    let mut h = harness("user-1", "Basic", &[]);
    h.session.start().await;
    h.session.on_command(SessionCommand::Pair).await;
    h.session.on_channel_event(qr("ABC123")).await;
    assert!(h.session.roster.pending_deadline().is_none());

    h.session.on_channel_event(status("connected")).await;
    assert_eq!(h.session.state(), &PairingState::Linked);
    let first = h.session.roster.pending_deadline();
    assert!(first.is_some());

    h.session.on_channel_event(status("connected")).await;
    assert_eq!(
        h.session.roster.pending_deadline(),
        first,
        "duplicate status must not reschedule"
    );
}

#[tokio::test]
async fn test_channel_close_while_waiting_unlinks() {
    let mut h = harness("user-1", "Basic", &[]);
    h.session.start().await;
    h.session.on_command(SessionCommand::Pair).await;
    h.session.on_channel_event(qr("ABC123")).await;

    h.session.on_channel_event(Some(ChannelEvent::Closed)).await;
    assert_eq!(h.session.state(), &PairingState::Unlinked);
    assert!(h.session.events.is_none());
}

#[tokio::test]
async fn test_channel_error_surfaces_notice() {
    let mut h = harness("user-1", "Basic", &[]);
    h.session.start().await;
    drain(&mut h.updates);

    h.session
        .on_channel_event(Some(ChannelEvent::Error("connection refused".into())))
        .await;
    assert_eq!(h.session.state(), &PairingState::Unlinked);
    let updates = drain(&mut h.updates);
    assert!(notices(&updates)
        .iter()
        .any(|n| n.level == NoticeLevel::Error && n.text.contains("connection refused")));
}

#[tokio::test]
async fn test_open_failure_becomes_channel_error() {
    let mut h = harness("user-1", "Basic", &[]);
    h.channel.fail_open(true);
    h.session.start().await;

    assert_eq!(h.session.state(), &PairingState::Unlinked);
    assert!(h.session.events.is_none());

    h.channel.fail_open(false);
    h.session.on_command(SessionCommand::Reconnect).await;
    assert_eq!(h.channel.opened(), vec!["user-1".to_string()]);
    assert!(h.session.events.is_some());
}

#[tokio::test]
async fn test_server_error_message_is_shown_verbatim() {
    let mut h = harness("user-1", "Basic", &[]);
    h.session.start().await;
    drain(&mut h.updates);

    h.session
        .on_channel_event(Some(ChannelEvent::Message(ServerMessage::Error(
            "WhatsApp session expired".into(),
        ))))
        .await;
    let updates = drain(&mut h.updates);
    assert!(states(&updates).is_empty());
    assert_eq!(notices(&updates)[0].text, "WhatsApp session expired");
}

#[tokio::test]
async fn test_remove_failure_leaves_roster_and_state() {
    let mut h = harness("user-1", "Basic", &[("a", true)]);
    h.session.start().await;
    h.session.on_channel_event(status("connected")).await;
    let before = h.session.roster().clone();
    drain(&mut h.updates);

    h.api.fail_delete(true);
    h.session
        .on_command(SessionCommand::Remove("a".into()))
        .await;

    assert!(Arc::ptr_eq(&before, h.session.roster()));
    assert_eq!(h.session.state(), &PairingState::Linked);
    let updates = drain(&mut h.updates);
    assert!(states(&updates).is_empty());
    assert!(notices(&updates)
        .iter()
        .any(|n| n.level == NoticeLevel::Error && n.text.contains("a")));
}

#[tokio::test]
async fn test_removing_linked_device_unlinks() {
    let mut h = harness("user-1", "Basic", &[("a", true), ("b", false)]);
    h.session.start().await;
    h.session.on_channel_event(status("connected")).await;
    h.session.on_command(SessionCommand::Refresh).await;
    assert_eq!(h.session.machine.tracked_device(), Some("a"));

    h.session
        .on_command(SessionCommand::Remove("b".into()))
        .await;
    assert_eq!(h.session.state(), &PairingState::Linked);

    h.session
        .on_command(SessionCommand::Remove("a".into()))
        .await;
    assert_eq!(h.session.state(), &PairingState::Unlinked);
    assert!(h.session.roster().is_empty());
}

#[tokio::test]
async fn test_refresh_failure_keeps_roster_and_warns() {
    let mut h = harness("user-1", "Basic", &[("a", true)]);
    h.session.start().await;
    let before = h.session.roster().clone();
    drain(&mut h.updates);

    h.api.fail_list(true);
    h.session.on_command(SessionCommand::Refresh).await;

    assert!(Arc::ptr_eq(&before, h.session.roster()));
    let updates = drain(&mut h.updates);
    assert!(notices(&updates)
        .iter()
        .any(|n| n.level == NoticeLevel::Warning));
    let stale_roster = updates.iter().find_map(|u| match u {
        SessionUpdate::Roster { roster, stale, .. } => Some((roster.clone(), *stale)),
        _ => None,
    });
    let (roster, stale) = stale_roster.expect("roster re-published after a failed refresh");
    assert!(stale);
    assert!(Arc::ptr_eq(&before, &roster));
}

#[tokio::test]
async fn test_removing_other_linked_device_keeps_link() {
    let mut h = harness("user-1", "Basic", &[("old", true), ("current", true)]);
    h.session.start().await;
    h.session.on_channel_event(status("connected")).await;

    h.session
        .on_command(SessionCommand::Remove("old".into()))
        .await;
    assert_eq!(h.session.state(), &PairingState::Linked);
    assert_eq!(h.session.roster().linked_count(), 1);
}

#[tokio::test]
async fn test_newly_paired_device_is_tracked() {
    let mut h = harness("user-1", "Basic", &[("old", true)]);
    h.session.start().await;
    h.session.on_command(SessionCommand::Pair).await;
    h.session.on_channel_event(qr("ABC123")).await;
    h.session.on_channel_event(status("connected")).await;

    h.api.set_devices(&[("old", true), ("new", true)]);
    h.session.on_command(SessionCommand::Refresh).await;
    assert_eq!(h.session.machine.tracked_device(), Some("new"));

    h.session
        .on_command(SessionCommand::Remove("old".into()))
        .await;
    assert_eq!(h.session.state(), &PairingState::Linked);

    h.session
        .on_command(SessionCommand::Remove("new".into()))
        .await;
    assert_eq!(h.session.state(), &PairingState::Unlinked);
}

#[tokio::test]
async fn test_status_answer_after_open_is_announced_once() {
    let mut h = harness("user-1", "Basic", &[]);
    h.session.start().await;
    drain(&mut h.updates);

    h.session.on_channel_event(Some(ChannelEvent::Opened)).await;
    h.session.on_channel_event(status("disconnected")).await;
    h.session.on_channel_event(status("disconnected")).await;

    let updates = drain(&mut h.updates);
    let synced: Vec<&PairingState> = updates
        .iter()
        .filter_map(|u| match u {
            SessionUpdate::Synced(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(synced, vec![&PairingState::Idle]);
    assert!(states(&updates).is_empty(), "resync answer was a no-op");
}

#[tokio::test]
async fn test_switch_user_refetches_roster_and_drops_pending_refresh() {
    let mut h = harness("user-1", "Free", &[("a", true)]);
    h.session.start().await;
    h.session.on_channel_event(status("connected")).await;
    assert!(h.session.roster.pending_deadline().is_some());
    assert_eq!(h.api.list_calls(), 1);

    h.api.set_devices(&[]);
    h.session
        .on_command(SessionCommand::SwitchUser("user-2".into()))
        .await;

    assert!(h.session.roster.pending_deadline().is_none());
    assert_eq!(h.api.list_calls(), 2);
    assert!(h.session.roster().is_empty());
    assert!(!h.session.at_limit());
    assert_eq!(
        h.channel.opened(),
        vec!["user-1".to_string(), "user-2".to_string()]
    );

    h.session
        .on_command(SessionCommand::SwitchUser("user-2".into()))
        .await;
    assert_eq!(h.api.list_calls(), 2, "same user is a no-op");
}

#[tokio::test]
async fn test_unlink_emits_disconnect_request() {
    let mut h = harness("user-1", "Basic", &[]);
    h.session.start().await;
    h.session.on_channel_event(status("connected")).await;

    h.session.on_command(SessionCommand::Unlink).await;
    assert_eq!(
        h.channel.emitted(),
        vec![ClientMessage::DisconnectRequest]
    );
    assert_eq!(h.session.state(), &PairingState::Linked);
}

// --- event loop ---

#[tokio::test(start_paused = true)]
async fn test_disconnect_burst_fires_one_fetch() {
    let h = harness("user-1", "Basic", &[("a", true)]);
    let (channel, api) = (h.channel.clone(), h.api.clone());
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let task = tokio::spawn(h.session.run(cmd_rx));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(api.list_calls(), 1, "initial load");

    channel.push(ChannelEvent::Opened).await;
    channel
        .push(status("connected").unwrap())
        .await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(api.list_calls(), 2, "refresh after linking");

    channel
        .push(status("disconnected").unwrap())
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    channel
        .push(status("disconnected").unwrap())
        .await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(api.list_calls(), 3, "one fetch for the burst");

    cmd_tx.send(SessionCommand::Quit).await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_flapping_is_coalesced() {
    let h = harness("user-1", "Basic", &[]);
    let (channel, api) = (h.channel.clone(), h.api.clone());
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let task = tokio::spawn(h.session.run(cmd_rx));
    tokio::time::sleep(Duration::from_millis(10)).await;

    for raw in ["connected", "disconnected", "connected", "disconnected"] {
        channel.push(status(raw).unwrap()).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert_eq!(api.list_calls(), 1, "nothing fires during the burst");

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(api.list_calls(), 2);

    drop(cmd_tx);
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_quit_tears_down_and_cancels_pending_refresh() {
    let h = harness("user-1", "Basic", &[]);
    let (channel, api) = (h.channel.clone(), h.api.clone());
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let task = tokio::spawn(h.session.run(cmd_rx));
    tokio::time::sleep(Duration::from_millis(10)).await;

    channel.push(status("connected").unwrap()).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    cmd_tx.send(SessionCommand::Quit).await.unwrap();
    task.await.unwrap().unwrap();

    assert!(!channel.is_attached());
    assert_eq!(channel.closes(), 1);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(api.list_calls(), 1, "pending refresh was cancelled");
}
