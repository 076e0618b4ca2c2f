use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::connection::ConnectionState;
use crate::error::CollaboratorError;
use crate::message::test_helpers::privmsg;

// =============================================================================
// FAKES
// =============================================================================

struct FakeSession {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    sent: mpsc::UnboundedSender<String>,
    reject_sends: bool,
}

#[async_trait::async_trait]
impl TransportSession for FakeSession {
    async fn recv(&mut self) -> Inbound {
        match self.inbound.recv().await {
            Some(inbound) => inbound,
            None => std::future::pending().await,
        }
    }

    async fn send(&mut self, line: &str) -> Result<(), TransportError> {
        if self.reject_sends {
            return Err(TransportError::Write("rejected".to_owned()));
        }
        let _ = self.sent.send(line.to_owned());
        Ok(())
    }

    async fn close(&mut self) {}
}

struct FakeTransport {
    sessions: Mutex<VecDeque<Result<Box<dyn TransportSession>, TransportError>>>,
    opens: AtomicUsize,
}

impl FakeTransport {
    fn new(sessions: Vec<Result<Box<dyn TransportSession>, TransportError>>) -> Self {
        Self { sessions: Mutex::new(sessions.into()), opens: AtomicUsize::new(0) }
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _channel: &str) -> Result<Box<dyn TransportSession>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.sessions.lock().ok().and_then(|mut sessions| sessions.pop_front());
        next.unwrap_or_else(|| Err(TransportError::Connect("no more sessions".to_owned())))
    }
}

struct FakeHistory(Vec<String>);

#[async_trait::async_trait]
impl HistorySource for FakeHistory {
    async fn recent(&self, _channel: &str) -> Result<Vec<String>, CollaboratorError> {
        Ok(self.0.clone())
    }
}

struct FakeProbe;

#[async_trait::async_trait]
impl LivenessProbe for FakeProbe {
    async fn status(&self, _channel: &str) -> Result<SourceStatus, CollaboratorError> {
        Ok(SourceStatus::Active)
    }
}

struct Wire {
    inbound: mpsc::UnboundedSender<Inbound>,
    sent: mpsc::UnboundedReceiver<String>,
}

fn fake_session(reject_sends: bool) -> (Box<dyn TransportSession>, Wire) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let session = FakeSession { inbound: inbound_rx, sent: sent_tx, reject_sends };
    (Box::new(session), Wire { inbound: inbound_tx, sent: sent_rx })
}

fn collaborators(transport: Arc<FakeTransport>, history: Vec<String>) -> Collaborators {
    Collaborators { transport, history: Arc::new(FakeHistory(history)), probe: Arc::new(FakeProbe) }
}

async fn wait_for(view: &mut watch::Receiver<ChatView>, predicate: impl FnMut(&ChatView) -> bool) -> ChatView {
    match tokio::time::timeout(Duration::from_secs(5), view.wait_for(predicate)).await {
        Ok(Ok(view)) => view.clone(),
        Ok(Err(_)) => panic!("session dropped its view"),
        Err(_) => panic!("timed out waiting for view"),
    }
}

fn ids(view: &ChatView) -> Vec<&str> {
    view.messages.iter().map(crate::history::Entry::id).collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[tokio::test]
async fn history_then_live_traffic_then_reconciled_send() {
    let (session, mut wire) = fake_session(false);
    let transport = Arc::new(FakeTransport::new(vec![Ok(session)]));
    let history = vec![privmsg("h1", "ann", "old"), privmsg("h2", "bob", "older")];
    let (handle, task) = spawn_session(Config::default(), SelfProfile::new("me"), collaborators(transport, history));
    let mut view = handle.subscribe();

    handle.connect("foo");
    wait_for(&mut view, |v| v.connection == ConnectionState::Live && v.messages.len() == 2).await;

    let _ = wire.inbound.send(Inbound::Text(privmsg("m1", "ann", "hi")));
    let current = wait_for(&mut view, |v| v.messages.len() == 3).await;
    assert_eq!(ids(&current), vec!["h1", "h2", "m1"]);

    let local_id = handle.send("hello", None).await.unwrap_or_else(|err| panic!("send: {err}"));
    assert_eq!(wire.sent.recv().await.as_deref(), Some("PRIVMSG #foo :hello"));
    assert!(handle.view().messages.iter().any(|entry| entry.id() == local_id));

    let _ = wire.inbound.send(Inbound::Text(privmsg("s1", "me", "hello")));
    let current = wait_for(&mut view, |v| v.messages.last().is_some_and(|entry| entry.id() == "s1")).await;
    assert_eq!(ids(&current), vec!["h1", "h2", "m1", "s1"]);

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn rejected_send_rolls_back_echo() {
    let (session, _wire) = fake_session(true);
    let transport = Arc::new(FakeTransport::new(vec![Ok(session)]));
    let (handle, task) = spawn_session(Config::default(), SelfProfile::new("me"), collaborators(transport, Vec::new()));
    let mut view = handle.subscribe();

    handle.connect("foo");
    wait_for(&mut view, |v| v.connection == ConnectionState::Live).await;

    let result = handle.send("hello", None).await;
    assert!(matches!(result, Err(SendError::Rejected(_))));
    assert!(handle.view().messages.is_empty());

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn failed_open_is_retried() {
    let (session, _wire) = fake_session(false);
    let transport = Arc::new(FakeTransport::new(vec![
        Err(TransportError::Connect("refused".to_owned())),
        Ok(session),
    ]));
    let mut config = Config::default();
    config.reconnect.initial_base = Duration::from_millis(10);
    config.reconnect.initial_step = Duration::ZERO;
    let (handle, task) = spawn_session(config, SelfProfile::new("me"), collaborators(Arc::clone(&transport), Vec::new()));
    let mut view = handle.subscribe();

    handle.connect("foo");
    wait_for(&mut view, |v| v.connection == ConnectionState::Live).await;
    assert_eq!(transport.opens.load(Ordering::SeqCst), 2);

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn abnormal_close_reconnects_and_keeps_buffer() {
    let (first, first_wire) = fake_session(false);
    let (second, _second_wire) = fake_session(false);
    let transport = Arc::new(FakeTransport::new(vec![Ok(first), Ok(second)]));
    let mut config = Config::default();
    config.reconnect.backoff_base = Duration::from_millis(10);
    let (handle, task) = spawn_session(config, SelfProfile::new("me"), collaborators(Arc::clone(&transport), Vec::new()));
    let mut view = handle.subscribe();

    handle.connect("foo");
    wait_for(&mut view, |v| v.connection == ConnectionState::Live).await;
    let _ = first_wire.inbound.send(Inbound::Text(privmsg("m1", "ann", "hi")));
    wait_for(&mut view, |v| v.messages.len() == 1).await;

    let _ = first_wire
        .inbound
        .send(Inbound::Closed { abnormal: true, reason: "reset".to_owned() });
    for _ in 0..500 {
        if transport.opens.load(Ordering::SeqCst) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let current = wait_for(&mut view, |v| v.connection == ConnectionState::Live).await;
    assert_eq!(ids(&current), vec!["m1"]);
    assert_eq!(transport.opens.load(Ordering::SeqCst), 2);

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn ping_is_answered_over_the_transport() {
    let (session, mut wire) = fake_session(false);
    let transport = Arc::new(FakeTransport::new(vec![Ok(session)]));
    let (handle, task) = spawn_session(Config::default(), SelfProfile::new("me"), collaborators(transport, Vec::new()));
    let mut view = handle.subscribe();

    handle.connect("foo");
    wait_for(&mut view, |v| v.connection == ConnectionState::Live).await;
    let _ = wire.inbound.send(Inbound::Text("PING :tmi.twitch.tv".to_owned()));
    assert_eq!(wire.sent.recv().await.as_deref(), Some("PONG :tmi.twitch.tv"));

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn send_after_shutdown_reports_closed_session() {
    let transport = Arc::new(FakeTransport::new(Vec::new()));
    let (handle, task) = spawn_session(Config::default(), SelfProfile::new("me"), collaborators(transport, Vec::new()));
    handle.shutdown();
    let _ = task.await;

    assert_eq!(handle.send("hi", None).await, Err(SendError::SessionClosed));
}
