use super::*;

fn chat(sender_id: &str, login: &str) -> ChatMessage {
    let mut msg = test_helpers::chat("m1", sender_id, "hi");
    msg.sender_login = login.to_owned();
    msg
}

#[test]
fn namespaced_ids_are_not_server_ids() {
    assert!(is_server_id("abc-123"));
    assert!(!is_server_id(""));
    assert!(!is_server_id(&local_id()));
    assert!(!is_server_id(&anon_id()));
}

#[test]
fn generated_local_ids_are_unique() {
    assert_ne!(local_id(), local_id());
}

#[test]
fn zero_duration_clear_is_a_timeout() {
    let clear = UserClearEvent {
        target_user_id: "u1".to_owned(),
        ban_duration: Some(Duration::ZERO),
    };
    assert_eq!(clear.moderation(), Moderation::Timeout { seconds: 0 });

    let ban = UserClearEvent { target_user_id: "u1".to_owned(), ban_duration: None };
    assert_eq!(ban.moderation(), Moderation::Ban);
}

#[test]
fn self_profile_matches_by_login_until_id_is_known() {
    let mut profile = SelfProfile::new("Ann");
    assert!(profile.is_self(&chat("999", "ann")));
    assert_eq!(profile.sender_key(), "ann");

    profile.apply(BadgeSync {
        user_id: Some("42".to_owned()),
        display_name: Some("Ann".to_owned()),
        color: Some("#FF0000".to_owned()),
        badges: vec![BadgeRef { name: "vip".to_owned(), version: "1".to_owned() }],
    });
    assert_eq!(profile.sender_key(), "42");
    assert!(profile.is_self(&chat("42", "renamed")));
    assert!(!profile.is_self(&chat("7", "bob")));
    assert_eq!(profile.name(), "Ann");
}

#[test]
fn badge_sync_keeps_fields_it_does_not_carry() {
    let mut profile = SelfProfile::new("ann");
    profile.apply(BadgeSync { user_id: Some("42".to_owned()), ..BadgeSync::default() });
    profile.apply(BadgeSync { color: Some("#00FF00".to_owned()), ..BadgeSync::default() });
    assert_eq!(profile.user_id.as_deref(), Some("42"));
    assert_eq!(profile.color.as_deref(), Some("#00FF00"));
}
