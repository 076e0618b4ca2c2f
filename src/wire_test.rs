use super::*;

#[test]
fn parse_line_reads_tags_prefix_params_and_trailing() {
    let line = parse_line(
        "@id=abc;display-name=Ann;badges=vip/1 :ann!ann@ann.tmi.twitch.tv PRIVMSG #foo :hello there",
    )
    .expect("line should parse");
    assert_eq!(line.command, "PRIVMSG");
    assert_eq!(line.params, vec!["#foo"]);
    assert_eq!(line.trailing, Some("hello there"));
    assert_eq!(line.tag("id"), Some("abc"));
    assert_eq!(line.nick(), Some("ann"));
}

#[test]
fn parse_line_without_tags_or_prefix() {
    let line = parse_line("PING :tmi.twitch.tv").expect("ping should parse");
    assert_eq!(line.command, "PING");
    assert!(line.params.is_empty());
    assert_eq!(line.trailing, Some("tmi.twitch.tv"));
    assert!(line.prefix.is_none());
}

#[test]
fn parse_line_keeps_empty_tag_values() {
    let line = parse_line("@color=;id=x :a!a@a PRIVMSG #c :x").expect("line should parse");
    assert_eq!(line.tag("color"), Some(""));
    assert_eq!(line.tag_nonempty("color"), None);
}

#[test]
fn parse_line_rejects_dangling_tags() {
    assert!(parse_line("@id=abc").is_none());
    assert!(parse_line("").is_none());
}

#[test]
fn tag_escaping_round_trips_special_characters() {
    let raw = "a; b\\c";
    let escaped = escape_tag(raw);
    assert_eq!(escaped, "a\\:\\sb\\\\c");
    assert_eq!(unescape_tag(&escaped), raw);
}

#[test]
fn split_lines_handles_crlf_batches() {
    let lines = split_lines("PING :a\r\n\r\n:relay HEARTBEAT\r\n").collect::<Vec<_>>();
    assert_eq!(lines, vec!["PING :a", ":relay HEARTBEAT"]);
}

#[test]
fn parse_badges_skips_malformed_items() {
    let badges = parse_badges("broadcaster/1,bogus,subscriber/12");
    assert_eq!(badges.len(), 2);
    assert_eq!(badges[1].name, "subscriber");
    assert_eq!(badges[1].version, "12");
    assert!(parse_badges("").is_empty());
}

#[test]
fn format_privmsg_tags_replies_and_flattens_newlines() {
    assert_eq!(format_privmsg("foo", "hi", None), "PRIVMSG #foo :hi");
    assert_eq!(
        format_privmsg("foo", "a\r\nJOIN #bar", Some("p1")),
        "@reply-parent-msg-id=p1 PRIVMSG #foo :a  JOIN #bar"
    );
}

#[test]
fn login_lines_include_pass_only_with_token() {
    let anonymous = login_lines("Foo", "justinfan1", None);
    assert_eq!(anonymous.len(), 3);
    assert_eq!(anonymous[2], "JOIN #foo");

    let authed = login_lines("foo", "Ann", Some("oauth:secret"));
    assert_eq!(authed[1], "PASS oauth:secret");
    assert_eq!(authed[2], "NICK ann");
}
