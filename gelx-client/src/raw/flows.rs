//! Per-request state machines driven by [`Connection::advance`].

use std::sync::Arc;

use gelx_errors::{
    AuthenticationError, Error, ErrorKind, ProtocolEncodingError, UnsupportedProtocolVersionError,
};
use gelx_protocol::annotations::{decode_warnings, Warning};
use gelx_protocol::client_message::{ClientHandshake, ClientMessage, SaslInitialResponse, SaslResponse};
use gelx_protocol::codec::Codec;
use gelx_protocol::common::{Capabilities, State};
use gelx_protocol::features::ProtocolVersion;
use gelx_protocol::registry::CodecRegistry;
use gelx_protocol::server_message::{
    Authentication, CommandDataDescription, ErrorResponse, RawPacket, RestoreReady, ServerMessage,
    TransactionState,
};
use gelx_protocol::value::Value;

use super::{Connection, Flow, Phase};
use crate::config::Config;
use crate::scram::ScramClient;

const SCRAM_METHOD: &str = "SCRAM-SHA-256";

/// Drives the connect sequence up to the first ReadyForCommand.
pub struct HandshakeFlow {
    user: String,
    password: String,
    params: Vec<(String, String)>,
    scram: Option<ScramClient>,
}

impl HandshakeFlow {
    pub(crate) fn new(config: &Config) -> HandshakeFlow {
        let mut params = vec![
            ("user".to_string(), config.user.clone()),
            ("database".to_string(), config.database.clone()),
            ("branch".to_string(), config.branch.clone()),
        ];
        if let Some(secret_key) = &config.secret_key {
            params.push(("secret_key".to_string(), secret_key.clone()));
        }
        HandshakeFlow {
            user: config.user.clone(),
            password: config.password.clone().unwrap_or_default(),
            params,
            scram: None,
        }
    }

    pub(crate) fn handshake(&self) -> ClientHandshake {
        let current = ProtocolVersion::current();
        let (major_ver, minor_ver) = current.version_tuple();
        ClientHandshake {
            major_ver,
            minor_ver,
            params: self.params.iter().cloned().collect(),
            extensions: Default::default(),
        }
    }
}

impl Flow for HandshakeFlow {
    fn on_message(&mut self, conn: &mut Connection, message: ServerMessage) -> Result<bool, Error> {
        match message {
            ServerMessage::ServerHandshake(handshake) => {
                let offered = ProtocolVersion::offered(handshake.major_ver, handshake.minor_ver);
                if !offered.supported() {
                    return Err(UnsupportedProtocolVersionError::with_message(format!(
                        "the server requested protocol version {}.{} \
                         but the minimum supported is {}.{}",
                        handshake.major_ver,
                        handshake.minor_ver,
                        ProtocolVersion::minimum().version_tuple().0,
                        ProtocolVersion::minimum().version_tuple().1,
                    )));
                }
                conn.set_proto(offered);
                Ok(false)
            }
            ServerMessage::Authentication(Authentication::Ok) => Ok(false),
            ServerMessage::Authentication(Authentication::Sasl { methods }) => {
                conn.set_phase(Phase::Authenticating);
                if !methods.iter().any(|method| method == SCRAM_METHOD) {
                    return Err(AuthenticationError::with_message(format!(
                        "the server offered no supported SASL method: {methods:?}"
                    )));
                }
                let scram = ScramClient::new(&self.user, &self.password);
                conn.send(&[ClientMessage::AuthenticationSaslInitialResponse(
                    SaslInitialResponse {
                        method: SCRAM_METHOD.into(),
                        data: scram.client_first().into(),
                    },
                )])?;
                self.scram = Some(scram);
                Ok(false)
            }
            ServerMessage::Authentication(Authentication::SaslContinue { data }) => {
                let Some(scram) = &mut self.scram else {
                    return Err(conn.protocol_error("SASL continuation without a SASL exchange"));
                };
                let server_first = std::str::from_utf8(&data)
                    .map_err(|_| AuthenticationError::with_message("invalid SASL payload"))?;
                let client_final = scram.handle_server_first(server_first)?;
                conn.send(&[ClientMessage::AuthenticationSaslResponse(SaslResponse {
                    data: client_final.into(),
                })])?;
                Ok(false)
            }
            ServerMessage::Authentication(Authentication::SaslFinal { data }) => {
                let Some(scram) = &self.scram else {
                    return Err(conn.protocol_error("SASL final without a SASL exchange"));
                };
                let server_final = std::str::from_utf8(&data)
                    .map_err(|_| AuthenticationError::with_message("invalid SASL payload"))?;
                scram.verify_server_final(server_final)?;
                Ok(false)
            }
            ServerMessage::ServerKeyData(key_data) => {
                conn.set_server_key(key_data.data);
                Ok(false)
            }
            ServerMessage::StateDataDescription(desc) => {
                conn.set_state_desc(desc.typedesc);
                Ok(false)
            }
            ServerMessage::ErrorResponse(err) => Err(err.into()),
            ServerMessage::ReadyForCommand(ready) => {
                conn.set_transaction_state(ready.transaction_state);
                if ready.transaction_state == TransactionState::NotInTransaction {
                    conn.set_phase(Phase::Ready);
                }
                Ok(true)
            }
            message => Err(conn.unexpected(&message)),
        }
    }
}

/// Awaits the data description answering a Parse.
pub struct ParseFlow {
    pub description: Option<CommandDataDescription>,
    pub warnings: Vec<Warning>,
    pub error: Option<ErrorResponse>,
}

impl ParseFlow {
    pub fn new() -> ParseFlow {
        ParseFlow {
            description: None,
            warnings: Vec::new(),
            error: None,
        }
    }
}

impl Default for ParseFlow {
    fn default() -> ParseFlow {
        ParseFlow::new()
    }
}

impl Flow for ParseFlow {
    fn on_message(&mut self, conn: &mut Connection, message: ServerMessage) -> Result<bool, Error> {
        match message {
            ServerMessage::StateDataDescription(desc) => {
                conn.set_state_desc(desc.typedesc);
                Ok(false)
            }
            ServerMessage::CommandDataDescription(desc) => {
                self.warnings
                    .extend(decode_warnings(&desc.annotations).unwrap_or_default());
                self.description = Some(desc);
                Ok(false)
            }
            ServerMessage::ErrorResponse(err) => {
                self.error = Some(err);
                Ok(false)
            }
            ServerMessage::ReadyForCommand(ready) => {
                conn.set_transaction_state(ready.transaction_state);
                conn.set_phase(Phase::Ready);
                Ok(true)
            }
            message => Err(conn.unexpected(&message)),
        }
    }
}

/// Streams Data messages through the output codec until the command
/// completes.
///
/// A row that fails to decode is remembered and surfaced only after
/// ReadyForCommand; later rows are drained without decoding so the
/// protocol stays in lockstep.
pub struct ExecuteFlow {
    registry: Arc<CodecRegistry>,
    pub out_codec: Arc<dyn Codec>,
    pub rows: Vec<Value>,
    pub description: Option<CommandDataDescription>,
    pub warnings: Vec<Warning>,
    pub status: Option<String>,
    pub new_state: Option<State>,
    pub capabilities: Option<Capabilities>,
    pub error: Option<ErrorResponse>,
    pub decode_error: Option<Error>,
}

impl ExecuteFlow {
    pub fn new(out_codec: Arc<dyn Codec>, registry: Arc<CodecRegistry>) -> ExecuteFlow {
        ExecuteFlow {
            registry,
            out_codec,
            rows: Vec::new(),
            description: None,
            warnings: Vec::new(),
            status: None,
            new_state: None,
            capabilities: None,
            error: None,
            decode_error: None,
        }
    }
}

impl Flow for ExecuteFlow {
    fn on_message(&mut self, conn: &mut Connection, message: ServerMessage) -> Result<bool, Error> {
        match message {
            ServerMessage::StateDataDescription(desc) => {
                conn.set_state_desc(desc.typedesc);
                Ok(false)
            }
            ServerMessage::CommandDataDescription(desc) => {
                // the server corrected our codec choice mid-request
                self.warnings
                    .extend(decode_warnings(&desc.annotations).unwrap_or_default());
                let out_desc = desc.output().map_err(ProtocolEncodingError::with_source)?;
                self.out_codec = out_desc
                    .build_codec(Some(&self.registry))
                    .map_err(ProtocolEncodingError::with_source)?;
                self.description = Some(desc);
                Ok(false)
            }
            ServerMessage::Data(data) => {
                if self.error.is_none() && self.decode_error.is_none() {
                    for chunk in &data.data {
                        match self.out_codec.decode(chunk) {
                            Ok(row) => self.rows.push(row),
                            Err(err) => {
                                self.decode_error =
                                    Some(ProtocolEncodingError::with_source(err));
                                break;
                            }
                        }
                    }
                }
                Ok(false)
            }
            ServerMessage::CommandComplete(complete) => {
                self.status = Some(complete.status);
                self.new_state = complete.state;
                self.capabilities = Some(complete.capabilities);
                Ok(false)
            }
            ServerMessage::ErrorResponse(err) => {
                self.error = Some(err);
                Ok(false)
            }
            ServerMessage::ReadyForCommand(ready) => {
                conn.set_transaction_state(ready.transaction_state);
                conn.set_phase(Phase::Ready);
                Ok(true)
            }
            message => Err(conn.unexpected(&message)),
        }
    }
}

/// Collects the dump header and blocks.
pub struct DumpFlow<'a> {
    pub header: Option<RawPacket>,
    pub status: Option<String>,
    pub error: Option<ErrorResponse>,
    pub sink: &'a mut dyn FnMut(RawPacket) -> Result<(), Error>,
}

impl<'a> DumpFlow<'a> {
    pub fn new(sink: &'a mut dyn FnMut(RawPacket) -> Result<(), Error>) -> DumpFlow<'a> {
        DumpFlow {
            header: None,
            status: None,
            error: None,
            sink,
        }
    }
}

impl Flow for DumpFlow<'_> {
    fn on_message(&mut self, conn: &mut Connection, message: ServerMessage) -> Result<bool, Error> {
        match message {
            ServerMessage::DumpHeader(packet) => {
                if self.header.is_some() {
                    return Err(conn.protocol_error("duplicate dump header block"));
                }
                self.header = Some(packet);
                Ok(false)
            }
            ServerMessage::DumpBlock(packet) => {
                if self.header.is_none() {
                    // a data block before the header is unrecoverable
                    return Err(conn.protocol_error("dump data block before the header block"));
                }
                (self.sink)(packet)?;
                Ok(false)
            }
            ServerMessage::CommandComplete(complete) => {
                self.status = Some(complete.status);
                Ok(false)
            }
            ServerMessage::ErrorResponse(err) => {
                self.error = Some(err);
                Ok(false)
            }
            ServerMessage::ReadyForCommand(ready) => {
                conn.set_transaction_state(ready.transaction_state);
                conn.set_phase(Phase::Ready);
                Ok(true)
            }
            message => Err(conn.unexpected(&message)),
        }
    }
}

/// Awaits the go-ahead for a restore.
pub struct RestoreReadyFlow {
    pub ready: Option<RestoreReady>,
}

impl RestoreReadyFlow {
    pub fn new() -> RestoreReadyFlow {
        RestoreReadyFlow { ready: None }
    }
}

impl Default for RestoreReadyFlow {
    fn default() -> RestoreReadyFlow {
        RestoreReadyFlow::new()
    }
}

impl Flow for RestoreReadyFlow {
    fn on_message(&mut self, conn: &mut Connection, message: ServerMessage) -> Result<bool, Error> {
        match message {
            ServerMessage::RestoreReady(ready) => {
                self.ready = Some(ready);
                Ok(true)
            }
            ServerMessage::ErrorResponse(err) => Err(err.into()),
            message => Err(conn.unexpected(&message)),
        }
    }
}

/// Awaits CommandComplete then ReadyForCommand after RestoreEof.
pub struct RestoreCompleteFlow {
    pub status: Option<String>,
    pub error: Option<ErrorResponse>,
}

impl RestoreCompleteFlow {
    pub fn new() -> RestoreCompleteFlow {
        RestoreCompleteFlow {
            status: None,
            error: None,
        }
    }
}

impl Default for RestoreCompleteFlow {
    fn default() -> RestoreCompleteFlow {
        RestoreCompleteFlow::new()
    }
}

impl Flow for RestoreCompleteFlow {
    fn on_message(&mut self, conn: &mut Connection, message: ServerMessage) -> Result<bool, Error> {
        match message {
            ServerMessage::CommandComplete(complete) => {
                self.status = Some(complete.status);
                Ok(false)
            }
            ServerMessage::ErrorResponse(err) => {
                self.error = Some(err);
                Ok(false)
            }
            ServerMessage::ReadyForCommand(ready) => {
                conn.set_transaction_state(ready.transaction_state);
                conn.set_phase(Phase::Ready);
                Ok(true)
            }
            message => Err(conn.unexpected(&message)),
        }
    }
}
