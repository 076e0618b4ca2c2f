use super::*;

fn manager(now: Instant) -> ConnectionManager {
    ConnectionManager::new(ReconnectPolicy::default(), HealthPolicy::default(), now)
}

fn scheduled(actions: &[ConnAction], kind: TimerKind) -> Option<Duration> {
    actions.iter().find_map(|action| match action {
        ConnAction::Schedule { kind: k, after } if *k == kind => Some(*after),
        _ => None,
    })
}

fn live(now: Instant) -> ConnectionManager {
    let mut conn = manager(now);
    conn.connect("foo", now);
    conn.on_opened(now);
    conn
}

// =============================================================================
// POLICY
// =============================================================================

#[test]
fn initial_delay_grows_linearly_and_caps() {
    let policy = ReconnectPolicy::default();
    assert_eq!(policy.initial_delay(0), Duration::from_secs(1));
    assert_eq!(policy.initial_delay(3), Duration::from_secs(4));
    assert_eq!(policy.initial_delay(50), Duration::from_secs(10));
}

#[test]
fn backoff_delay_doubles_and_caps() {
    let policy = ReconnectPolicy::default();
    assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
    assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
    assert_eq!(policy.backoff_delay(4), Duration::from_secs(16));
    assert_eq!(policy.backoff_delay(5), Duration::from_secs(30));
    assert_eq!(policy.backoff_delay(40), Duration::from_secs(30));
}

// =============================================================================
// CONNECT / DISCONNECT
// =============================================================================

#[test]
fn connect_opens_fetches_history_and_starts_health_check() {
    let now = Instant::now();
    let mut conn = manager(now);
    let actions = conn.connect("#Foo", now);

    assert_eq!(conn.state(), &ConnectionState::Connecting);
    assert_eq!(conn.channel(), Some("foo"));
    assert!(actions.contains(&ConnAction::Open {
        channel: "foo".to_owned(),
        attempt: 0,
        timeout: Duration::from_secs(10),
    }));
    assert!(actions.contains(&ConnAction::FetchHistory { channel: "foo".to_owned() }));
    assert_eq!(scheduled(&actions, TimerKind::HealthCheck), Some(Duration::from_secs(10)));
}

#[test]
fn connecting_to_the_active_channel_is_a_no_op() {
    let now = Instant::now();
    let mut conn = live(now);
    let epoch = conn.epoch();
    assert!(conn.connect("foo", now).is_empty());
    assert_eq!(conn.epoch(), epoch);
}

#[test]
fn switching_channel_closes_the_old_transport_and_bumps_epoch() {
    let now = Instant::now();
    let mut conn = live(now);
    let epoch = conn.epoch();
    let actions = conn.connect("bar", now);
    assert!(actions.contains(&ConnAction::Close));
    assert!(conn.epoch() > epoch);
    assert_eq!(conn.channel(), Some("bar"));
}

#[test]
fn opened_transport_goes_live() {
    let now = Instant::now();
    let conn = live(now);
    assert_eq!(conn.state(), &ConnectionState::Live);
    assert!(conn.can_send());
}

#[test]
fn disconnect_suppresses_every_later_reconnect() {
    let now = Instant::now();
    let mut conn = live(now);
    let actions = conn.disconnect();
    assert_eq!(actions, vec![ConnAction::CancelTimers, ConnAction::Close]);
    assert!(conn.is_intentional());

    assert!(conn.on_closed(true, "reset by peer").is_empty());
    assert!(conn.on_connect_failed("refused").is_empty());
    assert!(conn.on_reconnect_due(now).is_empty());
    assert!(conn.on_health_check(now + Duration::from_secs(600)).is_empty());
    assert!(conn.on_server_reconnect(now).is_empty());
    assert_eq!(conn.state(), &ConnectionState::Disconnected);
}

#[test]
fn transport_opened_after_disconnect_is_closed() {
    let now = Instant::now();
    let mut conn = manager(now);
    conn.connect("foo", now);
    conn.disconnect();
    assert_eq!(conn.on_opened(now), vec![ConnAction::Close]);
    assert_eq!(conn.state(), &ConnectionState::Disconnected);
}

// =============================================================================
// RETRIES
// =============================================================================

#[test]
fn first_connect_failures_use_linear_delay() {
    let now = Instant::now();
    let mut conn = manager(now);
    conn.connect("foo", now);

    let first = conn.on_connect_failed("refused");
    assert_eq!(scheduled(&first, TimerKind::Reconnect), Some(Duration::from_secs(1)));
    let second = conn.on_connect_failed("refused");
    assert_eq!(scheduled(&second, TimerKind::Reconnect), Some(Duration::from_secs(2)));
    assert_eq!(conn.attempt(), 2);
}

#[test]
fn reconnect_timer_reopens_with_current_attempt() {
    let now = Instant::now();
    let mut conn = manager(now);
    conn.connect("foo", now);
    conn.on_connect_failed("refused");
    let actions = conn.on_reconnect_due(now);
    assert_eq!(
        actions,
        vec![ConnAction::Open { channel: "foo".to_owned(), attempt: 1, timeout: Duration::from_secs(10) }]
    );
}

#[test]
fn abnormal_close_after_live_uses_exponential_backoff() {
    let now = Instant::now();
    let mut conn = live(now);

    let first = conn.on_closed(true, "reset");
    assert_eq!(conn.state(), &ConnectionState::Connecting);
    assert_eq!(scheduled(&first, TimerKind::Reconnect), Some(Duration::from_secs(1)));

    let second = conn.on_connect_failed("refused");
    assert_eq!(scheduled(&second, TimerKind::Reconnect), Some(Duration::from_secs(2)));
    let third = conn.on_connect_failed("refused");
    assert_eq!(scheduled(&third, TimerKind::Reconnect), Some(Duration::from_secs(4)));
}

#[test]
fn ten_consecutive_failures_end_in_dead() {
    let now = Instant::now();
    let mut conn = live(now);
    conn.on_closed(true, "reset");
    for _ in 0..8 {
        conn.on_reconnect_due(now);
        let actions = conn.on_connect_failed("refused");
        assert!(scheduled(&actions, TimerKind::Reconnect).is_some());
    }
    assert_eq!(conn.attempt(), 9);

    let last = conn.on_connect_failed("refused");
    assert_eq!(conn.state(), &ConnectionState::Dead);
    assert!(last.contains(&ConnAction::CancelTimers));
    assert!(scheduled(&last, TimerKind::Reconnect).is_none());
    assert!(conn.last_error().is_some_and(|err| err.contains("10 attempts")));

    // No further automatic attempts.
    assert!(conn.on_reconnect_due(now).is_empty());
    assert!(conn.on_health_check(now).is_empty());
}

#[test]
fn explicit_connect_after_dead_starts_over() {
    let now = Instant::now();
    let mut conn = manager(now);
    conn.connect("foo", now);
    for _ in 0..10 {
        conn.on_connect_failed("refused");
    }
    assert_eq!(conn.state(), &ConnectionState::Dead);

    let actions = conn.connect("foo", now);
    assert_eq!(conn.state(), &ConnectionState::Connecting);
    assert_eq!(conn.attempt(), 0);
    assert!(conn.last_error().is_none());
    assert!(actions.iter().any(|action| matches!(action, ConnAction::Open { attempt: 0, .. })));
}

#[test]
fn live_resets_the_failure_counter() {
    let now = Instant::now();
    let mut conn = live(now);
    conn.on_closed(true, "reset");
    conn.on_connect_failed("refused");
    conn.on_opened(now);
    assert_eq!(conn.attempt(), 0);
    assert_eq!(conn.state(), &ConnectionState::Live);
}

#[test]
fn normal_close_does_not_retry() {
    let now = Instant::now();
    let mut conn = live(now);
    let actions = conn.on_closed(false, "bye");
    assert_eq!(actions, vec![ConnAction::CancelTimers]);
    assert_eq!(conn.state(), &ConnectionState::Disconnected);
}

#[test]
fn server_reconnect_cycles_transport_without_counting_a_failure() {
    let now = Instant::now();
    let mut conn = live(now);
    let actions = conn.on_server_reconnect(now);
    assert_eq!(actions[0], ConnAction::Close);
    assert!(matches!(actions[1], ConnAction::Open { attempt: 0, .. }));
    assert!(!actions.iter().any(|action| matches!(action, ConnAction::FetchHistory { .. })));
    assert_eq!(conn.attempt(), 0);
}

// =============================================================================
// HEALTH
// =============================================================================

#[test]
fn silence_degrades_then_probes() {
    let start = Instant::now();
    let mut conn = live(start);

    let actions = conn.on_health_check(start + Duration::from_secs(60));
    assert_eq!(conn.state(), &ConnectionState::Live);
    assert_eq!(scheduled(&actions, TimerKind::HealthCheck), Some(Duration::from_secs(10)));

    conn.on_health_check(start + Duration::from_secs(121));
    assert!(matches!(conn.state(), ConnectionState::Degraded(_)));
    assert!(conn.warning().is_some());

    let actions = conn.on_health_check(start + Duration::from_secs(301));
    assert!(actions.contains(&ConnAction::Probe { channel: "foo".to_owned() }));

    // Only one probe in flight.
    let again = conn.on_health_check(start + Duration::from_secs(311));
    assert!(!again.iter().any(|action| matches!(action, ConnAction::Probe { .. })));
}

#[test]
fn inbound_traffic_recovers_from_degraded() {
    let start = Instant::now();
    let mut conn = live(start);
    conn.on_health_check(start + Duration::from_secs(130));
    assert!(matches!(conn.state(), ConnectionState::Degraded(_)));

    conn.on_signal(start + Duration::from_secs(131));
    assert_eq!(conn.state(), &ConnectionState::Live);
    assert!(conn.warning().is_none());
}

#[test]
fn probe_active_reconnects_transport_only() {
    let start = Instant::now();
    let mut conn = live(start);
    conn.on_health_check(start + Duration::from_secs(130));
    conn.on_health_check(start + Duration::from_secs(310));

    let actions = conn.on_probe(Ok(SourceStatus::Active), start + Duration::from_secs(311));
    assert_eq!(actions[0], ConnAction::Close);
    assert!(matches!(actions[1], ConnAction::Open { .. }));
    assert_eq!(conn.state(), &ConnectionState::Connecting);
}

#[test]
fn probe_error_is_treated_as_active() {
    let start = Instant::now();
    let mut conn = live(start);
    conn.on_health_check(start + Duration::from_secs(130));
    conn.on_health_check(start + Duration::from_secs(310));

    let actions = conn.on_probe(Err("timeout".to_owned()), start + Duration::from_secs(311));
    assert!(actions.iter().any(|action| matches!(action, ConnAction::Open { .. })));
}

#[test]
fn probe_ended_tears_down_and_reports() {
    let start = Instant::now();
    let mut conn = live(start);
    conn.on_health_check(start + Duration::from_secs(130));
    conn.on_health_check(start + Duration::from_secs(310));

    let actions = conn.on_probe(Ok(SourceStatus::Ended), start + Duration::from_secs(311));
    assert!(actions.contains(&ConnAction::SourceEnded { channel: "foo".to_owned() }));
    assert_eq!(conn.state(), &ConnectionState::Disconnected);
    assert!(conn.on_closed(true, "reset").is_empty());
}

#[test]
fn stale_probe_result_is_ignored_once_recovered() {
    let start = Instant::now();
    let mut conn = live(start);
    conn.on_health_check(start + Duration::from_secs(130));
    conn.on_health_check(start + Duration::from_secs(310));
    conn.on_signal(start + Duration::from_secs(311));

    assert!(conn.on_probe(Ok(SourceStatus::Ended), start + Duration::from_secs(312)).is_empty());
    assert_eq!(conn.state(), &ConnectionState::Live);
}

// =============================================================================
// RELAY SIGNALS
// =============================================================================

#[test]
fn relay_reconnect_signals_degrade_and_exhaustion_kills() {
    let now = Instant::now();
    let mut conn = live(now);

    conn.on_session_signal(&SessionSignal::Reconnecting(2), now);
    assert_eq!(conn.state(), &ConnectionState::Degraded("upstream reconnecting (attempt 2)".to_owned()));

    conn.on_session_signal(&SessionSignal::Connected, now);
    assert_eq!(conn.state(), &ConnectionState::Live);

    let actions = conn.on_session_signal(&SessionSignal::ReconnectExhausted, now);
    assert_eq!(conn.state(), &ConnectionState::Dead);
    assert!(actions.contains(&ConnAction::Close));
}

#[test]
fn relay_warning_is_surfaced_without_state_change() {
    let now = Instant::now();
    let mut conn = live(now);
    conn.on_session_signal(&SessionSignal::Warning("slow upstream".to_owned()), now);
    assert_eq!(conn.state(), &ConnectionState::Live);
    assert_eq!(conn.warning(), Some("slow upstream"));
}
