//! Coverage of the engine surface.
//!
//! A [`RecordingEngine`] wraps every engine the fixture creates and marks each
//! operation as it is called; dispatched callbacks are marked by the peer.
//! [`SCENARIO_CATALOGUE`] declares what each scenario is meant to exercise.
//! [`CoverageReport`] compares the two against the full surface.
//!
//! Coverage is informational. Nothing here ever fails a run.

use std::{
    collections::BTreeSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use duet_core::{
    Address, BootstrapNode, ConnectionStatus, EngineError, EngineEvent, EventKind, FileControl,
    FileId, FileKind, FileNumber, FriendId, MessageId, MessageType, Nospam, ProtocolEngine,
    PublicKey, SecretKey, UserStatus,
};

use EngineOp as O;
use EventKind as K;
use Surface::{Event as E, Op as P};

macro_rules! engine_ops {
    ($($variant:ident => $name:literal,)*) => {
        /// Every operation of [`ProtocolEngine`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[allow(missing_docs)]
        pub enum EngineOp {
            $($variant,)*
        }

        impl EngineOp {
            /// Every operation, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)*];

            /// Number of operations.
            pub const COUNT: usize = Self::ALL.len();

            /// Method name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }
        }
    };
}

engine_ops! {
    Iterate => "iterate",
    IterationInterval => "iteration_interval",
    Address => "address",
    PublicKey => "public_key",
    SecretKey => "secret_key",
    DhtId => "dht_id",
    Nospam => "nospam",
    SetNospam => "set_nospam",
    UdpPort => "udp_port",
    SelfName => "self_name",
    SetSelfName => "set_self_name",
    SelfStatusMessage => "self_status_message",
    SetSelfStatusMessage => "set_self_status_message",
    SelfStatus => "self_status",
    SetSelfStatus => "set_self_status",
    SelfConnectionStatus => "self_connection_status",
    SetTyping => "set_typing",
    Bootstrap => "bootstrap",
    AddTcpRelay => "add_tcp_relay",
    FriendAdd => "friend_add",
    FriendAddNorequest => "friend_add_norequest",
    FriendDelete => "friend_delete",
    FriendExists => "friend_exists",
    FriendList => "friend_list",
    FriendListSize => "friend_list_size",
    FriendByPublicKey => "friend_by_public_key",
    FriendPublicKey => "friend_public_key",
    FriendConnectionStatus => "friend_connection_status",
    FriendStatus => "friend_status",
    FriendStatusMessage => "friend_status_message",
    FriendName => "friend_name",
    FriendTyping => "friend_typing",
    FriendLastOnline => "friend_last_online",
    FriendSendMessage => "friend_send_message",
    FileSend => "file_send",
    FileSendChunk => "file_send_chunk",
    FileControl => "file_control",
    FileSeek => "file_seek",
    FileId => "file_id",
    Savedata => "savedata",
}

impl EngineOp {
    fn index(self) -> usize {
        self as usize
    }
}

/// One point of the engine surface: an operation or a callback kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Surface {
    /// An engine operation
    Op(EngineOp),
    /// A callback kind
    Event(EventKind),
}

impl Surface {
    /// Method or callback name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Op(op) => op.name(),
            Self::Event(kind) => kind.name(),
        }
    }

    /// The whole surface: operations first, then callbacks.
    pub fn all() -> Vec<Self> {
        EngineOp::ALL
            .iter()
            .map(|op| Self::Op(*op))
            .chain(EventKind::ALL.iter().map(|kind| Self::Event(*kind)))
            .collect()
    }
}

/// What one scenario declares it exercises.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioDoc {
    /// Scenario function name
    pub name: &'static str,
    /// Surface the scenario is written to exercise
    pub exercises: &'static [Surface],
}

/// Declared coverage of every library scenario, in suite order.
pub static SCENARIO_CATALOGUE: &[ScenarioDoc] = &[
    ScenarioDoc {
        name: "self_identity",
        exercises: &[
            P(O::Address),
            P(O::PublicKey),
            P(O::SecretKey),
            P(O::DhtId),
            P(O::Nospam),
            P(O::SetNospam),
            P(O::UdpPort),
        ],
    },
    ScenarioDoc {
        name: "self_profile",
        exercises: &[
            P(O::SelfName),
            P(O::SetSelfName),
            P(O::SelfStatusMessage),
            P(O::SetSelfStatusMessage),
            P(O::SelfStatus),
            P(O::SetSelfStatus),
        ],
    },
    ScenarioDoc {
        name: "connect",
        exercises: &[
            P(O::Bootstrap),
            P(O::AddTcpRelay),
            P(O::SelfConnectionStatus),
            P(O::Iterate),
            P(O::IterationInterval),
            E(K::SelfConnectionStatus),
        ],
    },
    ScenarioDoc {
        name: "add_friend_norequest",
        exercises: &[
            P(O::FriendAddNorequest),
            P(O::FriendExists),
            P(O::FriendList),
            P(O::FriendListSize),
            P(O::FriendLastOnline),
            P(O::FriendPublicKey),
            P(O::FriendConnectionStatus),
            E(K::FriendConnectionStatus),
            E(K::FriendStatus),
        ],
    },
    ScenarioDoc {
        name: "friend_request",
        exercises: &[P(O::FriendAdd), P(O::FriendByPublicKey), E(K::FriendRequest)],
    },
    ScenarioDoc {
        name: "status_message_propagation",
        exercises: &[P(O::SetSelfStatusMessage), P(O::FriendStatusMessage), E(K::FriendStatusMessage)],
    },
    ScenarioDoc {
        name: "user_status_propagation",
        exercises: &[P(O::SetSelfStatus), P(O::FriendStatus), E(K::FriendStatus)],
    },
    ScenarioDoc {
        name: "name_propagation",
        exercises: &[P(O::SetSelfName), P(O::FriendName), E(K::FriendName)],
    },
    ScenarioDoc {
        name: "typing_propagation",
        exercises: &[P(O::SetTyping), P(O::FriendTyping), E(K::FriendTyping)],
    },
    ScenarioDoc {
        name: "message_delivery",
        exercises: &[P(O::FriendSendMessage), E(K::FriendMessage), E(K::FriendReadReceipt)],
    },
    ScenarioDoc {
        name: "file_transfer",
        exercises: &[
            P(O::FileSend),
            P(O::FileSendChunk),
            P(O::FileControl),
            P(O::FileSeek),
            P(O::FileId),
            E(K::FileRecv),
            E(K::FileRecvControl),
            E(K::FileRecvChunk),
            E(K::FileChunkRequest),
        ],
    },
    ScenarioDoc { name: "savedata_roundtrip", exercises: &[P(O::Savedata)] },
    ScenarioDoc { name: "delete_friend", exercises: &[P(O::FriendDelete), P(O::FriendExists)] },
];

struct LogInner {
    ops: Vec<AtomicBool>,
    events: Vec<AtomicBool>,
}

/// Record of which surface points were invoked.
///
/// Clones share the same record, so one log can span many fixtures.
#[derive(Clone)]
pub struct CoverageLog {
    inner: Arc<LogInner>,
}

impl Default for CoverageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl CoverageLog {
    /// Empty log.
    pub fn new() -> Self {
        let flags = |n: usize| -> Vec<AtomicBool> { (0..n).map(|_| AtomicBool::new(false)).collect() };
        Self { inner: Arc::new(LogInner { ops: flags(EngineOp::COUNT), events: flags(EventKind::COUNT) }) }
    }

    /// Mark an operation invoked.
    pub fn op(&self, op: EngineOp) {
        self.inner.ops[op.index()].store(true, Ordering::Relaxed);
    }

    /// Mark a callback kind dispatched.
    pub fn event(&self, kind: EventKind) {
        self.inner.events[kind.index()].store(true, Ordering::Relaxed);
    }

    /// Every surface point invoked so far.
    pub fn invoked(&self) -> Vec<Surface> {
        let ops = EngineOp::ALL
            .iter()
            .filter(|op| self.inner.ops[op.index()].load(Ordering::Relaxed))
            .map(|op| Surface::Op(*op));
        let events = EventKind::ALL
            .iter()
            .filter(|kind| self.inner.events[kind.index()].load(Ordering::Relaxed))
            .map(|kind| Surface::Event(*kind));
        ops.chain(events).collect()
    }
}

impl fmt::Debug for CoverageLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoverageLog").field("invoked", &self.invoked().len()).finish()
    }
}

/// Coverage summary.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageReport {
    /// Size of the surface
    pub total: usize,
    /// Surface points some scenario declares
    pub declared: usize,
    /// `declared / total` as a percentage
    pub percent: f64,
    /// Surface points no scenario declares
    pub untested: Vec<&'static str>,
    /// Points invoked during the run that no scenario declares
    pub undeclared: Vec<&'static str>,
    /// Points declared but never invoked during the run
    pub missed: Vec<&'static str>,
}

impl CoverageReport {
    /// Report for the full surface, the library catalogue and `log`.
    pub fn compute(log: &CoverageLog) -> Self {
        let declared: Vec<Surface> =
            SCENARIO_CATALOGUE.iter().flat_map(|doc| doc.exercises.iter().copied()).collect();
        Self::from_parts(&Surface::all(), &declared, &log.invoked())
    }

    /// Report over an explicit universe.
    pub fn from_parts(universe: &[Surface], declared: &[Surface], invoked: &[Surface]) -> Self {
        let declared: BTreeSet<Surface> = declared.iter().copied().collect();
        let invoked: BTreeSet<Surface> = invoked.iter().copied().collect();

        let covered = universe.iter().filter(|s| declared.contains(*s)).count();
        let percent =
            if universe.is_empty() { 100.0 } else { covered as f64 * 100.0 / universe.len() as f64 };

        let names = |pred: &dyn Fn(&Surface) -> bool| {
            universe.iter().filter(|s| pred(s)).map(|s| s.name()).collect::<Vec<_>>()
        };

        Self {
            total: universe.len(),
            declared: covered,
            percent,
            untested: names(&|s: &Surface| !declared.contains(s)),
            undeclared: names(&|s: &Surface| invoked.contains(s) && !declared.contains(s)),
            missed: names(&|s: &Surface| declared.contains(s) && !invoked.contains(s)),
        }
    }

    /// Log the report at info.
    pub fn log(&self) {
        tracing::info!(
            percent = self.percent,
            declared = self.declared,
            total = self.total,
            "coverage"
        );
        if !self.untested.is_empty() {
            tracing::info!(untested = ?self.untested, "surface not covered by any scenario");
        }
        if !self.undeclared.is_empty() {
            tracing::info!(undeclared = ?self.undeclared, "invoked but not declared");
        }
        if !self.missed.is_empty() {
            tracing::info!(missed = ?self.missed, "declared but not invoked");
        }
    }
}

impl fmt::Display for CoverageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "coverage: {:.1}% ({} of {})", self.percent, self.declared, self.total)?;
        writeln!(f, "untested: {}", self.untested.join(", "))?;
        writeln!(f, "undeclared: {}", self.undeclared.join(", "))?;
        write!(f, "missed: {}", self.missed.join(", "))
    }
}

/// Engine decorator that records every call into a [`CoverageLog`].
pub struct RecordingEngine {
    inner: Box<dyn ProtocolEngine>,
    log: CoverageLog,
}

impl RecordingEngine {
    /// Wrap `inner`, recording into `log`.
    pub fn new(inner: Box<dyn ProtocolEngine>, log: CoverageLog) -> Self {
        Self { inner, log }
    }

    /// The log calls are recorded into.
    pub fn log(&self) -> &CoverageLog {
        &self.log
    }
}

impl ProtocolEngine for RecordingEngine {
    fn iterate(&mut self) -> Vec<EngineEvent> {
        self.log.op(O::Iterate);
        self.inner.iterate()
    }

    fn iteration_interval(&self) -> Duration {
        self.log.op(O::IterationInterval);
        self.inner.iteration_interval()
    }

    fn address(&self) -> Address {
        self.log.op(O::Address);
        self.inner.address()
    }

    fn public_key(&self) -> PublicKey {
        self.log.op(O::PublicKey);
        self.inner.public_key()
    }

    fn secret_key(&self) -> SecretKey {
        self.log.op(O::SecretKey);
        self.inner.secret_key()
    }

    fn dht_id(&self) -> PublicKey {
        self.log.op(O::DhtId);
        self.inner.dht_id()
    }

    fn nospam(&self) -> Nospam {
        self.log.op(O::Nospam);
        self.inner.nospam()
    }

    fn set_nospam(&mut self, nospam: Nospam) {
        self.log.op(O::SetNospam);
        self.inner.set_nospam(nospam);
    }

    fn udp_port(&self) -> Result<u16, EngineError> {
        self.log.op(O::UdpPort);
        self.inner.udp_port()
    }

    fn self_name(&self) -> String {
        self.log.op(O::SelfName);
        self.inner.self_name()
    }

    fn set_self_name(&mut self, name: &str) -> Result<(), EngineError> {
        self.log.op(O::SetSelfName);
        self.inner.set_self_name(name)
    }

    fn self_status_message(&self) -> String {
        self.log.op(O::SelfStatusMessage);
        self.inner.self_status_message()
    }

    fn set_self_status_message(&mut self, message: &str) -> Result<(), EngineError> {
        self.log.op(O::SetSelfStatusMessage);
        self.inner.set_self_status_message(message)
    }

    fn self_status(&self) -> UserStatus {
        self.log.op(O::SelfStatus);
        self.inner.self_status()
    }

    fn set_self_status(&mut self, status: UserStatus) {
        self.log.op(O::SetSelfStatus);
        self.inner.set_self_status(status);
    }

    fn self_connection_status(&self) -> ConnectionStatus {
        self.log.op(O::SelfConnectionStatus);
        self.inner.self_connection_status()
    }

    fn set_typing(&mut self, friend: FriendId, typing: bool) -> Result<(), EngineError> {
        self.log.op(O::SetTyping);
        self.inner.set_typing(friend, typing)
    }

    fn bootstrap(&mut self, node: &BootstrapNode) -> Result<(), EngineError> {
        self.log.op(O::Bootstrap);
        self.inner.bootstrap(node)
    }

    fn add_tcp_relay(&mut self, node: &BootstrapNode) -> Result<(), EngineError> {
        self.log.op(O::AddTcpRelay);
        self.inner.add_tcp_relay(node)
    }

    fn friend_add(&mut self, address: &Address, message: &[u8]) -> Result<FriendId, EngineError> {
        self.log.op(O::FriendAdd);
        self.inner.friend_add(address, message)
    }

    fn friend_add_norequest(&mut self, public_key: &PublicKey) -> Result<FriendId, EngineError> {
        self.log.op(O::FriendAddNorequest);
        self.inner.friend_add_norequest(public_key)
    }

    fn friend_delete(&mut self, friend: FriendId) -> Result<(), EngineError> {
        self.log.op(O::FriendDelete);
        self.inner.friend_delete(friend)
    }

    fn friend_exists(&self, friend: FriendId) -> bool {
        self.log.op(O::FriendExists);
        self.inner.friend_exists(friend)
    }

    fn friend_list(&self) -> Vec<FriendId> {
        self.log.op(O::FriendList);
        self.inner.friend_list()
    }

    fn friend_list_size(&self) -> usize {
        self.log.op(O::FriendListSize);
        self.inner.friend_list_size()
    }

    fn friend_by_public_key(&self, public_key: &PublicKey) -> Result<FriendId, EngineError> {
        self.log.op(O::FriendByPublicKey);
        self.inner.friend_by_public_key(public_key)
    }

    fn friend_public_key(&self, friend: FriendId) -> Result<PublicKey, EngineError> {
        self.log.op(O::FriendPublicKey);
        self.inner.friend_public_key(friend)
    }

    fn friend_connection_status(&self, friend: FriendId) -> Result<ConnectionStatus, EngineError> {
        self.log.op(O::FriendConnectionStatus);
        self.inner.friend_connection_status(friend)
    }

    fn friend_status(&self, friend: FriendId) -> Result<UserStatus, EngineError> {
        self.log.op(O::FriendStatus);
        self.inner.friend_status(friend)
    }

    fn friend_status_message(&self, friend: FriendId) -> Result<String, EngineError> {
        self.log.op(O::FriendStatusMessage);
        self.inner.friend_status_message(friend)
    }

    fn friend_name(&self, friend: FriendId) -> Result<String, EngineError> {
        self.log.op(O::FriendName);
        self.inner.friend_name(friend)
    }

    fn friend_typing(&self, friend: FriendId) -> Result<bool, EngineError> {
        self.log.op(O::FriendTyping);
        self.inner.friend_typing(friend)
    }

    fn friend_last_online(&self, friend: FriendId) -> Result<u64, EngineError> {
        self.log.op(O::FriendLastOnline);
        self.inner.friend_last_online(friend)
    }

    fn friend_send_message(
        &mut self,
        friend: FriendId,
        kind: MessageType,
        message: &[u8],
    ) -> Result<MessageId, EngineError> {
        self.log.op(O::FriendSendMessage);
        self.inner.friend_send_message(friend, kind, message)
    }

    fn file_send(
        &mut self,
        friend: FriendId,
        kind: FileKind,
        size: u64,
        file_id: Option<FileId>,
        filename: &[u8],
    ) -> Result<FileNumber, EngineError> {
        self.log.op(O::FileSend);
        self.inner.file_send(friend, kind, size, file_id, filename)
    }

    fn file_send_chunk(
        &mut self,
        friend: FriendId,
        file: FileNumber,
        position: u64,
        data: &[u8],
    ) -> Result<(), EngineError> {
        self.log.op(O::FileSendChunk);
        self.inner.file_send_chunk(friend, file, position, data)
    }

    fn file_control(
        &mut self,
        friend: FriendId,
        file: FileNumber,
        control: FileControl,
    ) -> Result<(), EngineError> {
        self.log.op(O::FileControl);
        self.inner.file_control(friend, file, control)
    }

    fn file_seek(
        &mut self,
        friend: FriendId,
        file: FileNumber,
        position: u64,
    ) -> Result<(), EngineError> {
        self.log.op(O::FileSeek);
        self.inner.file_seek(friend, file, position)
    }

    fn file_id(&self, friend: FriendId, file: FileNumber) -> Result<FileId, EngineError> {
        self.log.op(O::FileId);
        self.inner.file_id(friend, file)
    }

    fn savedata(&self) -> Result<Vec<u8>, EngineError> {
        self.log.op(O::Savedata);
        self.inner.savedata()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_only_names_real_surface() {
        let all: BTreeSet<Surface> = Surface::all().into_iter().collect();
        for doc in SCENARIO_CATALOGUE {
            for surface in doc.exercises {
                assert!(all.contains(surface), "{} declares unknown {:?}", doc.name, surface);
            }
        }
    }

    #[test]
    fn catalogue_covers_every_callback() {
        let report = CoverageReport::compute(&CoverageLog::new());
        for kind in EventKind::ALL {
            assert!(!report.untested.contains(&kind.name()), "{} untested", kind.name());
        }
    }

    #[test]
    fn log_records_ops_and_events() {
        let log = CoverageLog::new();
        log.op(EngineOp::FriendAdd);
        log.event(EventKind::FriendRequest);
        log.op(EngineOp::FriendAdd);

        assert_eq!(
            log.invoked(),
            vec![Surface::Op(EngineOp::FriendAdd), Surface::Event(EventKind::FriendRequest)]
        );
    }

    #[test]
    fn report_renders_lists() {
        let universe = [
            Surface::Op(EngineOp::FriendAdd),
            Surface::Op(EngineOp::FriendDelete),
            Surface::Op(EngineOp::SetTyping),
            Surface::Event(EventKind::FriendTyping),
        ];
        let declared = [Surface::Op(EngineOp::FriendAdd), Surface::Event(EventKind::FriendTyping)];
        let invoked = [Surface::Op(EngineOp::FriendAdd), Surface::Op(EngineOp::SetTyping)];

        let report = CoverageReport::from_parts(&universe, &declared, &invoked);

        insta::assert_snapshot!(report.to_string(), @r"
        coverage: 50.0% (2 of 4)
        untested: friend_delete, set_typing
        undeclared: set_typing
        missed: on_friend_typing
        ");
    }
}
