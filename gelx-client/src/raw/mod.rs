/*!
The transport-free protocol engine.

[`Connection`] holds the handshake state, the inbound frame buffer and
the outbound frame queue. It never touches a socket: a driver feeds it
received bytes, writes out whatever [`Connection::advance`] hands back,
and blocks (or awaits) only when the engine asks for more input. All
codec and message work runs to completion between those suspension
points, so one connection never interleaves two requests on the wire.
*/

mod flows;

pub use flows::{
    DumpFlow, ExecuteFlow, HandshakeFlow, ParseFlow, RestoreCompleteFlow, RestoreReadyFlow,
};

use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};

use gelx_errors::{
    ClientConnectionClosedError, Error, ErrorKind, ProtocolEncodingError, ProtocolError,
};
use gelx_protocol::client_message::ClientMessage;
use gelx_protocol::common::RawTypedesc;
use gelx_protocol::encoding::{Input, MessageBuffer, Output};
use gelx_protocol::features::ProtocolVersion;
use gelx_protocol::server_message::{ServerMessage, TransactionState};

use crate::config::Config;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Authenticating,
    Ready,
    Busy,
    Closed,
    Aborted,
}

/// What the driver must do next.
#[derive(Debug)]
pub enum Advance {
    /// Write this frame to the socket.
    Write(Bytes),
    /// Feed more received bytes, then call `advance` again.
    Read,
    /// The active flow completed.
    Done,
}

/// A request in flight: reacts to inbound messages until it completes.
pub trait Flow {
    fn on_message(
        &mut self,
        conn: &mut Connection,
        message: ServerMessage,
    ) -> Result<bool, Error>;
}

pub struct Connection {
    phase: Phase,
    proto: ProtocolVersion,
    inbuf: MessageBuffer,
    outbox: VecDeque<Bytes>,
    transaction_state: TransactionState,
    server_key: Option<[u8; 32]>,
    server_settings: HashMap<String, Bytes>,
    state_desc: RawTypedesc,
}

impl Connection {
    /// Start a connection attempt: the client handshake is queued for
    /// sending and a [`HandshakeFlow`] drives the rest.
    pub fn connect(config: &Config) -> (Connection, HandshakeFlow) {
        let mut conn = Connection {
            phase: Phase::Connecting,
            proto: ProtocolVersion::current(),
            inbuf: MessageBuffer::new(),
            outbox: VecDeque::new(),
            transaction_state: TransactionState::NotInTransaction,
            server_key: None,
            server_settings: HashMap::new(),
            state_desc: RawTypedesc::uninitialized(),
        };
        let flow = HandshakeFlow::new(config);
        conn.send(&[ClientMessage::ClientHandshake(flow.handshake())])
            .expect("handshake always encodes");
        (conn, flow)
    }

    pub fn proto(&self) -> &ProtocolVersion {
        &self.proto
    }
    pub fn phase(&self) -> Phase {
        self.phase
    }
    pub fn transaction_state(&self) -> TransactionState {
        self.transaction_state
    }
    pub fn server_key(&self) -> Option<&[u8; 32]> {
        self.server_key.as_ref()
    }
    pub fn server_setting(&self, name: &str) -> Option<&Bytes> {
        self.server_settings.get(name)
    }
    pub fn state_desc(&self) -> &RawTypedesc {
        &self.state_desc
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self.phase, Phase::Ready)
    }

    /// Encode messages into the outbound queue.
    pub fn send(&mut self, messages: &[ClientMessage]) -> Result<(), Error> {
        if matches!(self.phase, Phase::Closed | Phase::Aborted) {
            return Err(ClientConnectionClosedError::with_message(
                "the connection has been closed",
            ));
        }
        let mut bytes = BytesMut::new();
        for message in messages {
            message
                .encode(&mut Output::new(&self.proto, &mut bytes))
                .map_err(ProtocolEncodingError::with_source)?;
        }
        self.outbox.push_back(bytes.freeze());
        Ok(())
    }

    /// Mark the start of a request.
    pub fn begin_request(&mut self) -> Result<(), Error> {
        match self.phase {
            Phase::Ready => {
                self.phase = Phase::Busy;
                Ok(())
            }
            Phase::Closed | Phase::Aborted => Err(ClientConnectionClosedError::with_message(
                "the connection has been closed",
            )),
            _ => Err(gelx_errors::ClientInconsistentError::with_message(
                "a request is already in flight",
            )),
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.inbuf.feed(data);
    }

    /// Take one queued outbound frame, if any.
    pub fn next_outgoing(&mut self) -> Option<Bytes> {
        self.outbox.pop_front()
    }

    /// Take one already-buffered message without waiting for more bytes.
    pub fn poll_message(&mut self) -> Result<Option<ServerMessage>, Error> {
        match self.inbuf.take_message() {
            None => Ok(None),
            Some(frame) => {
                let mut input = Input::new(self.proto.clone(), frame);
                let message = ServerMessage::decode(&mut input)
                    .map_err(ProtocolEncodingError::with_source)?;
                Ok(Some(self.intercept(message)))
            }
        }
    }

    /// Drive the active flow as far as buffered data allows.
    pub fn advance(&mut self, flow: &mut dyn Flow) -> Result<Advance, Error> {
        loop {
            if let Some(frame) = self.outbox.pop_front() {
                return Ok(Advance::Write(frame));
            }
            if matches!(self.phase, Phase::Aborted) {
                return Err(ClientConnectionClosedError::with_message(
                    "the connection has been aborted",
                ));
            }
            match self.poll_message()? {
                None => return Ok(Advance::Read),
                Some(ServerMessage::ParameterStatus(..)) => {}
                Some(ServerMessage::LogMessage(..)) => {}
                Some(message) => {
                    if flow.on_message(self, message)? {
                        return Ok(Advance::Done);
                    }
                }
            }
        }
    }

    fn intercept(&mut self, message: ServerMessage) -> ServerMessage {
        match &message {
            ServerMessage::ParameterStatus(status) => {
                let name = String::from_utf8_lossy(&status.name).to_string();
                log::debug!("server setting {name}");
                self.server_settings.insert(name, status.value.clone());
            }
            ServerMessage::LogMessage(log_message) => {
                log::info!(
                    "server log [{:?}] {}",
                    log_message.severity,
                    log_message.text
                );
            }
            _ => {}
        }
        message
    }

    pub(crate) fn set_proto(&mut self, proto: ProtocolVersion) {
        self.proto = proto;
    }
    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }
    pub(crate) fn set_transaction_state(&mut self, state: TransactionState) {
        self.transaction_state = state;
    }
    pub(crate) fn set_server_key(&mut self, key: [u8; 32]) {
        self.server_key = Some(key);
    }
    pub(crate) fn set_state_desc(&mut self, desc: RawTypedesc) {
        self.state_desc = desc;
    }

    /// Queue the goodbye message and stop accepting requests.
    pub fn terminate(&mut self) -> Result<(), Error> {
        self.send(&[ClientMessage::Terminate])?;
        self.phase = Phase::Closed;
        Ok(())
    }

    /// Drop all protocol state; the socket must be torn down by the
    /// driver. Any later call fails with a closed-connection error.
    pub fn abort(&mut self) {
        self.phase = Phase::Aborted;
        self.outbox.clear();
    }

    pub(crate) fn unexpected(&self, message: &ServerMessage) -> Error {
        gelx_errors::ProtocolOutOfOrderError::with_message(format!(
            "unsolicited message {message:?}"
        ))
    }

    pub(crate) fn protocol_error(&self, text: &'static str) -> Error {
        ProtocolError::with_message(text)
    }
}
