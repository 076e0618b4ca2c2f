use super::*;

#[test]
fn normal_close_code_is_graceful() {
    let frame = CloseFrame { code: CloseCode::Normal, reason: "bye".into() };
    assert_eq!(close_outcome(Some(&frame)), (false, "1000 bye".to_owned()));
}

#[test]
fn other_close_codes_are_abnormal() {
    let away = CloseFrame { code: CloseCode::Away, reason: "".into() };
    assert!(close_outcome(Some(&away)).0);
    let error = CloseFrame { code: CloseCode::Error, reason: "oops".into() };
    assert!(close_outcome(Some(&error)).0);
    assert!(close_outcome(None).0);
}

#[test]
fn history_payload_parses_messages_in_order() {
    let json = r#"{"messages":["@id=a :x!x@x PRIVMSG #foo :1","@id=b :x!x@x PRIVMSG #foo :2"]}"#;
    let lines = parse_history(json).unwrap_or_default();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("@id=a"));
}

#[test]
fn malformed_history_is_a_decode_error() {
    assert!(matches!(parse_history("{\"msgs\":[]}"), Err(CollaboratorError::Decode(_))));
}

#[test]
fn probe_payload_maps_to_status() {
    assert_eq!(parse_probe(r#"{"live":true}"#).ok(), Some(SourceStatus::Active));
    assert_eq!(parse_probe(r#"{"live":false,"viewers":0}"#).ok(), Some(SourceStatus::Ended));
    assert!(parse_probe("not json").is_err());
}

#[test]
fn url_template_expands_channel() {
    assert_eq!(expand("https://h.example/api/{channel}/recent", "foo"), "https://h.example/api/foo/recent");
}

#[test]
fn anonymous_nick_is_read_only_login() {
    let nick = anonymous_nick();
    assert!(nick.starts_with("justinfan"));
    assert!(nick["justinfan".len()..].parse::<u32>().is_ok());

    let transport = WsTransport::new("wss://irc.example", None, None);
    assert!(transport.is_anonymous());
    assert!(transport.nick().starts_with("justinfan"));

    let named = WsTransport::new("wss://irc.example", Some("Ann".to_owned()), Some("tok".to_owned()));
    assert_eq!(named.nick(), "ann");
    assert!(!named.is_anonymous());
}

#[tokio::test]
async fn null_collaborators_are_benign() {
    assert_eq!(NoHistory.recent("foo").await.ok(), Some(Vec::new()));
    assert_eq!(NoProbe.status("foo").await.ok(), Some(SourceStatus::Active));
}
