pub mod dispatcher;
pub mod handshake;
pub mod timer;

use rand::Rng;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::config::Config;
use crate::digits::{channel_number, DigitAggregator, DEFAULT_MAX_DIGITS};
use crate::model::{ConnectionState, DisconnectReason, SessionEvent};
use crate::protocol::{button_name, ButtonCode, CONTROL_PORT};
use dispatcher::{Dispatcher, KeyWrite};
use handshake::Step;
use timer::Timer;

const READ_BUFFER_SIZE: usize = 4096;
const EVENT_CHANNEL_SIZE: usize = 64;

pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
    keepalive: bool,
}

impl TcpConnector {
    pub fn new(ip: IpAddr, port: u16, keepalive: bool) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
            keepalive,
        }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let addr = self.addr;
        let keepalive = self.keepalive;
        async move {
            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            socket.set_keepalive(keepalive)?;
            let stream = socket.connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub port: u16,
    pub keepalive: bool,
    pub connect_timeout: Duration,
    pub startup_delay: Duration,
    pub key_delay: Duration,
    pub reconnect_secs: RangeInclusive<u64>,
    pub debounce: Duration,
    pub max_digits: usize,
    pub confirm: Option<ButtonCode>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            port: CONTROL_PORT,
            keepalive: true,
            connect_timeout: Duration::from_secs(10),
            startup_delay: Duration::from_millis(100),
            key_delay: Duration::from_millis(100),
            reconnect_secs: 3..=19,
            debounce: Duration::from_millis(1500),
            max_digits: DEFAULT_MAX_DIGITS,
            confirm: Some(ButtonCode::CURSOR_ENTER),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        let session = &config.session;
        let channel = &config.channel;
        Self {
            port: session.port,
            keepalive: session.keepalive,
            connect_timeout: Duration::from_millis(session.connect_timeout_ms),
            startup_delay: Duration::from_millis(session.startup_delay_ms),
            key_delay: Duration::from_millis(session.key_delay_ms),
            reconnect_secs: session.reconnect_min_secs..=session.reconnect_max_secs,
            debounce: Duration::from_millis(channel.debounce_ms),
            max_digits: channel.max_digits,
            confirm: channel
                .confirm_with_enter
                .then_some(ButtonCode::CURSOR_ENTER),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        jittered_delay(&self.reconnect_secs, &mut rand::thread_rng())
    }
}

pub fn jittered_delay<R: Rng>(secs: &RangeInclusive<u64>, rng: &mut R) -> Duration {
    let (lo, hi) = (*secs.start(), *secs.end());
    let (lo, hi) = (lo.min(hi), lo.max(hi));
    Duration::from_secs(rng.gen_range(lo..=hi))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Press(ButtonCode),
    Enqueue(Vec<ButtonCode>),
    DiscardDigits,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct Session {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn spawn<C: Connector>(
        label: impl Into<String>,
        connector: C,
        settings: SessionSettings,
    ) -> (Self, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        let task = SessionTask {
            label: label.into(),
            connector,
            dispatcher: Dispatcher::new(settings.key_delay),
            digits: DigitAggregator::new(settings.debounce, settings.max_digits, settings.confirm),
            settings,
            state: ConnectionState::Disconnected,
            stream: None,
            inbound: Vec::new(),
            connect_timeout: Timer::default(),
            reconnect: Timer::default(),
            commands: commands_rx,
            state_tx,
            events: events_tx.clone(),
        };
        let handle = tokio::spawn(task.run());

        (
            Self {
                commands: commands_tx,
                state: state_rx,
                events: events_tx,
            },
            handle,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_reachable(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn press(&self, code: ButtonCode) {
        self.send(SessionCommand::Press(code));
    }

    pub fn enqueue(&self, codes: Vec<ButtonCode>) {
        self.send(SessionCommand::Enqueue(codes));
    }

    pub fn discard_digits(&self) {
        self.send(SessionCommand::DiscardDigits);
    }

    pub fn shutdown(&self) {
        self.send(SessionCommand::Shutdown);
    }

    fn send(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!("session task already stopped; command dropped");
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<SessionCommand>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (_, state) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        (
            Self {
                commands,
                state,
                events,
            },
            commands_rx,
        )
    }
}

struct SessionTask<C: Connector> {
    label: String,
    connector: C,
    settings: SessionSettings,
    state: ConnectionState,
    stream: Option<C::Stream>,
    // Handshake bytes read but not yet matched.
    inbound: Vec<u8>,
    dispatcher: Dispatcher,
    digits: DigitAggregator,
    connect_timeout: Timer,
    reconnect: Timer,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl<C: Connector> SessionTask<C> {
    async fn run(mut self) {
        self.reconnect.arm(self.settings.startup_delay);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                read = read_chunk(self.stream.as_mut(), &mut buf) => match read {
                    Ok(0) => self.disconnected(DisconnectReason::Ended),
                    Ok(n) => self.on_data(&buf[..n]).await,
                    Err(err) => {
                        tracing::debug!(device = %self.label, error = %err, "socket error");
                        self.disconnected(DisconnectReason::from_io(&err));
                    }
                },
                _ = self.connect_timeout.wait() => self.on_connect_timeout(),
                _ = self.reconnect.wait() => self.connect().await,
                _ = self.dispatcher.timer().wait() => self.on_dispatch_timer().await,
                _ = self.digits.timer().wait() => {
                    if let Some(selection) = self.digits.on_timer() {
                        self.select_channel(selection).await;
                    }
                }
            }
        }

        self.stream = None;
        self.dispatcher.clear();
        self.set_state(ConnectionState::Disconnected);
        tracing::info!(device = %self.label, "session stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Press(code) if code.is_digit() => {
                if let Some(selection) = self.digits.press(code) {
                    self.select_channel(selection).await;
                } else {
                    tracing::debug!(
                        device = %self.label,
                        buffered = self.digits.buffered().len(),
                        "digit buffered"
                    );
                }
            }
            SessionCommand::Press(code) => {
                self.discard_digits();
                self.enqueue(vec![code]).await;
            }
            SessionCommand::Enqueue(codes) => self.enqueue(codes).await,
            SessionCommand::DiscardDigits => self.discard_digits(),
            SessionCommand::Shutdown => {}
        }
    }

    fn discard_digits(&mut self) {
        let dropped = self.digits.cancel();
        if dropped > 0 {
            tracing::debug!(device = %self.label, dropped, "partial channel selection discarded");
        }
    }

    async fn select_channel(&mut self, codes: Vec<ButtonCode>) {
        tracing::info!(device = %self.label, channel = %channel_number(&codes), "switching channel");
        self.enqueue(codes).await;
    }

    async fn enqueue(&mut self, codes: Vec<ButtonCode>) {
        if codes.is_empty() {
            return;
        }
        if self.state != ConnectionState::Connected {
            tracing::warn!(
                device = %self.label,
                state = %self.state,
                codes = codes.len(),
                "box not connected; command dropped"
            );
            self.disconnected(DisconnectReason::Closed);
            return;
        }
        self.dispatcher.enqueue(codes);
        if let Some(write) = self.dispatcher.kick() {
            self.write_key(write).await;
        }
    }

    async fn on_dispatch_timer(&mut self) {
        if self.state != ConnectionState::Connected {
            self.dispatcher.clear();
            return;
        }
        if let Some(write) = self.dispatcher.on_timer() {
            self.write_key(write).await;
        }
    }

    async fn write_key(&mut self, write: KeyWrite) {
        if let Err(err) = self.write(&write.frame()).await {
            tracing::warn!(device = %self.label, error = %err, "key write failed");
            self.disconnected(DisconnectReason::from_io(&err));
            return;
        }
        if let KeyWrite::Up(code) = write {
            tracing::debug!(
                device = %self.label,
                code = %code,
                button = button_name(code).unwrap_or("?"),
                "key sent"
            );
            let _ = self.events.send(SessionEvent::CommandSent { code });
        }
    }

    async fn on_data(&mut self, chunk: &[u8]) {
        if self.state == ConnectionState::Connected {
            tracing::trace!(device = %self.label, bytes = chunk.len(), data = ?chunk, "data from box");
            return;
        }

        self.inbound.extend_from_slice(chunk);
        while self.state != ConnectionState::Connected {
            let transition = match handshake::step(self.state, &self.inbound) {
                Step::Advance(transition) => transition,
                Step::NeedMore => return,
                Step::Unexpected => {
                    tracing::debug!(
                        device = %self.label,
                        state = %self.state,
                        bytes = self.inbound.len(),
                        "unexpected handshake data; waiting"
                    );
                    self.inbound.clear();
                    return;
                }
            };
            self.inbound.drain(..transition.consumed);

            if let Some(reply) = transition.reply.as_deref() {
                if let Err(err) = self.write(reply).await {
                    self.disconnected(DisconnectReason::from_io(&err));
                    return;
                }
            }

            if transition.next == ConnectionState::Connected {
                self.connect_timeout.cancel();
                tracing::info!(device = %self.label, "connected and ready to send commands");
            }
            self.set_state(transition.next);
        }

        if !self.inbound.is_empty() {
            tracing::trace!(device = %self.label, bytes = self.inbound.len(), "data from box after handshake");
            self.inbound.clear();
        }
    }

    async fn connect(&mut self) {
        self.reconnect.cancel();
        self.stream = None;
        self.inbound.clear();
        self.dispatcher.clear();
        self.set_state(ConnectionState::Disconnected);
        self.connect_timeout.arm(self.settings.connect_timeout);

        tracing::info!(
            device = %self.label,
            timeout_ms = self.settings.connect_timeout.as_millis() as u64,
            "connecting"
        );

        match tokio::time::timeout(self.settings.connect_timeout, self.connector.connect()).await {
            Ok(Ok(stream)) => {
                tracing::debug!(device = %self.label, "socket open; waiting for version banner");
                self.stream = Some(stream);
            }
            Ok(Err(err)) => {
                tracing::debug!(device = %self.label, error = %err, "connect failed");
                self.disconnected(DisconnectReason::from_io(&err));
            }
            Err(_) => self.disconnected(DisconnectReason::NotPossible),
        }
    }

    fn on_connect_timeout(&mut self) {
        self.connect_timeout.cancel();
        tracing::warn!(device = %self.label, state = %self.state, "handshake did not complete in time");
        self.disconnected(DisconnectReason::NotPossible);
    }

    fn disconnected(&mut self, reason: DisconnectReason) {
        self.connect_timeout.cancel();
        self.stream = None;
        self.inbound.clear();
        let dropped = self.dispatcher.clear();
        self.set_state(ConnectionState::Disconnected);

        let retry_in = self.settings.reconnect_delay();
        self.reconnect.arm(retry_in);
        tracing::info!(
            device = %self.label,
            reason = %reason,
            retry_in_secs = retry_in.as_secs(),
            dropped,
            "disconnected"
        );
        let _ = self.events.send(SessionEvent::Disconnected { reason, retry_in });
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        let from = self.state;
        self.state = next;
        self.state_tx.send_replace(next);
        tracing::debug!(device = %self.label, from = %from, to = %next, "state changed");
        let _ = self.events.send(SessionEvent::StateChanged { from, to: next });
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        stream.write_all(bytes).await?;
        stream.flush().await
    }
}

async fn read_chunk<S>(stream: Option<&mut S>, buf: &mut [u8]) -> io::Result<usize>
where
    S: AsyncRead + Unpin,
{
    match stream {
        Some(stream) => stream.read(buf).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tests::decode_key_frame;
    use crate::protocol::KEY_FRAME_LEN;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::io::DuplexStream;
    use tokio::time::Instant;

    const MENU: ButtonCode = ButtonCode(0xe00a);
    const BACK: ButtonCode = ButtonCode(0xe002);

    #[derive(Clone, Default)]
    struct ScriptedConnector {
        streams: Arc<Mutex<VecDeque<DuplexStream>>>,
    }

    impl ScriptedConnector {
        fn with_box() -> (Self, DuplexStream) {
            let (client, server) = tokio::io::duplex(64 * 1024);
            let connector = Self::default();
            connector.streams.lock().unwrap().push_back(client);
            (connector, server)
        }
    }

    impl Connector for ScriptedConnector {
        type Stream = DuplexStream;

        fn connect(&self) -> impl Future<Output = io::Result<DuplexStream>> + Send {
            let next = self.streams.lock().unwrap().pop_front();
            async move { next.ok_or_else(|| io::ErrorKind::ConnectionRefused.into()) }
        }
    }

    fn fast_settings() -> SessionSettings {
        SessionSettings {
            connect_timeout: Duration::from_secs(2),
            startup_delay: Duration::from_millis(1),
            key_delay: Duration::from_millis(40),
            debounce: Duration::from_millis(150),
            ..SessionSettings::default()
        }
    }

    async fn wait_for_state(session: &Session, want: ConnectionState) {
        let mut rx = session.watch_state();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for state")
            .expect("session task stopped");
    }

    async fn next_disconnect(
        events: &mut broadcast::Receiver<SessionEvent>,
    ) -> (DisconnectReason, Duration) {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let event = tokio::time::timeout_at(deadline, events.recv())
                .await
                .expect("timed out waiting for disconnect")
                .unwrap();
            if let SessionEvent::Disconnected { reason, retry_in } = event {
                return (reason, retry_in);
            }
        }
    }

    async fn handshake(session: &Session, fake_box: &mut DuplexStream) {
        let banner = b"RFB 003.008\n";
        fake_box.write_all(banner).await.unwrap();
        let mut echo = [0u8; 12];
        fake_box.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, banner);

        fake_box.write_all(&[0x01, 0x01]).await.unwrap();
        let mut chosen = [0u8; 1];
        fake_box.read_exact(&mut chosen).await.unwrap();
        assert_eq!(chosen, [0x01]);

        fake_box.write_all(&[0x00; 4]).await.unwrap();
        wait_for_state(session, ConnectionState::Authenticated).await;

        fake_box.write_all(&[0x00; 24]).await.unwrap();
        wait_for_state(session, ConnectionState::Connected).await;
    }

    async fn read_keys(fake_box: &mut DuplexStream, count: usize) -> Vec<(ButtonCode, bool, Instant)> {
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            let mut frame = [0u8; KEY_FRAME_LEN];
            tokio::time::timeout(Duration::from_secs(2), fake_box.read_exact(&mut frame))
                .await
                .expect("timed out waiting for key frame")
                .unwrap();
            let (code, down) = decode_key_frame(&frame).expect("not a key frame");
            keys.push((code, down, Instant::now()));
        }
        keys
    }

    fn codes(keys: &[(ButtonCode, bool, Instant)]) -> Vec<(ButtonCode, bool)> {
        keys.iter().map(|(c, d, _)| (*c, *d)).collect()
    }

    #[tokio::test]
    async fn handshake_unlocks_dispatch_in_order() {
        let (connector, mut fake_box) = ScriptedConnector::with_box();
        let settings = fast_settings();
        let key_delay = settings.key_delay;
        let (session, _task) = Session::spawn("living room", connector, settings);
        assert!(!session.is_reachable());

        handshake(&session, &mut fake_box).await;
        assert!(session.is_reachable());

        session.enqueue(vec![MENU]);
        session.enqueue(vec![BACK]);
        let keys = read_keys(&mut fake_box, 4).await;
        assert_eq!(
            codes(&keys),
            vec![(MENU, true), (MENU, false), (BACK, true), (BACK, false)]
        );
        assert!(keys[1].2 - keys[0].2 >= key_delay);
        assert!(keys[2].2 - keys[1].2 >= key_delay);
    }

    #[tokio::test]
    async fn short_auth_result_does_not_advance() {
        let (connector, mut fake_box) = ScriptedConnector::with_box();
        let (session, _task) = Session::spawn("bedroom", connector, fast_settings());

        fake_box.write_all(b"RFB 003.008\n").await.unwrap();
        let mut echo = [0u8; 12];
        fake_box.read_exact(&mut echo).await.unwrap();
        fake_box.write_all(&[0x01, 0x01]).await.unwrap();
        let mut chosen = [0u8; 1];
        fake_box.read_exact(&mut chosen).await.unwrap();
        wait_for_state(&session, ConnectionState::Authenticating).await;

        fake_box.write_all(&[0x00; 3]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), ConnectionState::Authenticating);
        assert!(!session.is_reachable());
    }

    #[tokio::test]
    async fn auth_result_and_server_init_in_one_write_connect() {
        let (connector, mut fake_box) = ScriptedConnector::with_box();
        let (session, _task) = Session::spawn("loft", connector, fast_settings());

        fake_box.write_all(b"RFB 003.008\n").await.unwrap();
        let mut echo = [0u8; 12];
        fake_box.read_exact(&mut echo).await.unwrap();
        fake_box.write_all(&[0x01, 0x01]).await.unwrap();
        let mut chosen = [0u8; 1];
        fake_box.read_exact(&mut chosen).await.unwrap();

        fake_box.write_all(&[0x00; 28]).await.unwrap();
        wait_for_state(&session, ConnectionState::Connected).await;

        session.enqueue(vec![MENU]);
        let keys = read_keys(&mut fake_box, 2).await;
        assert_eq!(codes(&keys), vec![(MENU, true), (MENU, false)]);
    }

    #[tokio::test]
    async fn banner_split_across_writes_is_echoed_whole() {
        let (connector, mut fake_box) = ScriptedConnector::with_box();
        let (session, _task) = Session::spawn("cellar", connector, fast_settings());

        fake_box.write_all(b"RFB 00").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        fake_box.write_all(b"3.008\n").await.unwrap();

        let mut echo = [0u8; 12];
        tokio::time::timeout(Duration::from_secs(2), fake_box.read_exact(&mut echo))
            .await
            .expect("timed out waiting for banner echo")
            .unwrap();
        assert_eq!(&echo, b"RFB 003.008\n");
        wait_for_state(&session, ConnectionState::Connecting).await;
    }

    #[tokio::test]
    async fn silent_box_hits_connect_timeout() {
        let (connector, _fake_box) = ScriptedConnector::with_box();
        let settings = SessionSettings {
            connect_timeout: Duration::from_millis(80),
            ..fast_settings()
        };
        let (session, _task) = Session::spawn("attic", connector, settings);
        let mut events = session.subscribe();

        let (reason, retry_in) = next_disconnect(&mut events).await;
        assert_eq!(reason, DisconnectReason::NotPossible);
        assert!((3..=19).contains(&retry_in.as_secs()));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn refused_connect_is_tagged() {
        let (session, _task) = Session::spawn("garage", ScriptedConnector::default(), fast_settings());
        let mut events = session.subscribe();
        let (reason, retry_in) = next_disconnect(&mut events).await;
        assert_eq!(reason, DisconnectReason::Refused);
        assert!((3..=19).contains(&retry_in.as_secs()));
    }

    #[tokio::test]
    async fn peer_close_falls_back_to_disconnected() {
        let (connector, mut fake_box) = ScriptedConnector::with_box();
        let (session, _task) = Session::spawn("den", connector, fast_settings());
        let mut events = session.subscribe();
        handshake(&session, &mut fake_box).await;

        drop(fake_box);
        let (reason, retry_in) = next_disconnect(&mut events).await;
        assert_eq!(reason, DisconnectReason::Ended);
        assert!((3..=19).contains(&retry_in.as_secs()));
        assert!(!session.is_reachable());
    }

    #[tokio::test]
    async fn enqueue_while_disconnected_reschedules_instead_of_writing() {
        let (session, _task) = Session::spawn("porch", ScriptedConnector::default(), fast_settings());
        let mut events = session.subscribe();
        let (reason, _) = next_disconnect(&mut events).await;
        assert_eq!(reason, DisconnectReason::Refused);

        session.enqueue(vec![MENU]);
        let (reason, retry_in) = next_disconnect(&mut events).await;
        assert_eq!(reason, DisconnectReason::Closed);
        assert!((3..=19).contains(&retry_in.as_secs()));
    }

    #[tokio::test]
    async fn three_digits_become_one_channel_selection() {
        let (connector, mut fake_box) = ScriptedConnector::with_box();
        let (session, _task) = Session::spawn("kitchen", connector, fast_settings());
        handshake(&session, &mut fake_box).await;

        for n in [3, 1, 1] {
            session.press(ButtonCode::digit(n).unwrap());
        }
        let keys = read_keys(&mut fake_box, 8).await;
        let downs: Vec<ButtonCode> = codes(&keys)
            .into_iter()
            .filter_map(|(code, down)| down.then_some(code))
            .collect();
        assert_eq!(
            downs,
            vec![
                ButtonCode::digit(3).unwrap(),
                ButtonCode::digit(1).unwrap(),
                ButtonCode::digit(1).unwrap(),
                ButtonCode::CURSOR_ENTER,
            ]
        );
    }

    #[tokio::test]
    async fn partial_selection_flushes_after_debounce() {
        let (connector, mut fake_box) = ScriptedConnector::with_box();
        let settings = fast_settings();
        let debounce = settings.debounce;
        let (session, _task) = Session::spawn("office", connector, settings);
        handshake(&session, &mut fake_box).await;

        let pressed_at = Instant::now();
        session.press(ButtonCode::digit(7).unwrap());
        let keys = read_keys(&mut fake_box, 4).await;
        assert!(keys[0].2 - pressed_at >= debounce);
        assert_eq!(
            codes(&keys),
            vec![
                (ButtonCode::digit(7).unwrap(), true),
                (ButtonCode::digit(7).unwrap(), false),
                (ButtonCode::CURSOR_ENTER, true),
                (ButtonCode::CURSOR_ENTER, false),
            ]
        );
    }

    #[tokio::test]
    async fn non_digit_discards_buffered_digits() {
        let (connector, mut fake_box) = ScriptedConnector::with_box();
        let (session, _task) = Session::spawn("hall", connector, fast_settings());
        let mut events = session.subscribe();
        handshake(&session, &mut fake_box).await;

        session.press(ButtonCode::digit(4).unwrap());
        session.press(ButtonCode::digit(2).unwrap());
        session.press(MENU);
        let keys = read_keys(&mut fake_box, 2).await;
        assert_eq!(codes(&keys), vec![(MENU, true), (MENU, false)]);

        // Nothing else arrives once the debounce window has passed.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut sent = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::CommandSent { code } = event {
                sent.push(code);
            }
        }
        assert_eq!(sent, vec![MENU]);
    }

    #[tokio::test]
    async fn shutdown_stops_the_task() {
        let (session, task) = Session::spawn("shed", ScriptedConnector::default(), fast_settings());
        session.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("session did not stop")
            .unwrap();
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen_low = false;
        let mut seen_high = false;
        for _ in 0..2000 {
            let secs = jittered_delay(&(3..=19), &mut rng).as_secs();
            assert!((3..=19).contains(&secs));
            seen_low |= secs == 3;
            seen_high |= secs == 19;
        }
        assert!(seen_low && seen_high);
    }

    #[test]
    fn reversed_jitter_bounds_are_tolerated() {
        let mut rng = StdRng::seed_from_u64(11);
        #[allow(clippy::reversed_empty_ranges)]
        let secs = jittered_delay(&(10..=5), &mut rng).as_secs();
        assert!((5..=10).contains(&secs));
    }
}
