/*!
The blocking client: the same engine driven over a `std::net` socket.

Receive deadlines use `set_read_timeout`; when a deadline fires the
connection is aborted, mirroring the cooperative driver's cancellation
behavior.
*/

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use bytes::Bytes;

use gelx_errors::{
    ClientConnectionClosedError, ClientConnectionError, ClientConnectionFailedTemporarilyError,
    ClientConnectionTimeoutError, Error, ErrorKind, ProtocolOutOfOrderError, SHOULD_RECONNECT,
};
use gelx_protocol::client_message::{ClientMessage, Execute, Parse, Restore, RestoreBlock};
use gelx_protocol::common::{Capabilities, IoFormat, TransactionState};
use gelx_protocol::encoding::Annotations;
use gelx_protocol::query_arg::Arguments;
use gelx_protocol::registry::CodecRegistry;
use gelx_protocol::server_message::ServerMessage;
use gelx_protocol::value::Value;

use crate::cache::{CachedQuery, QueryCache};
use crate::config::Config;
use crate::options::RetryOptions;
use crate::queries::{self, QueryParams};
use crate::raw::{
    Advance, Connection, DumpFlow, ExecuteFlow, Flow, ParseFlow, Phase, RestoreCompleteFlow,
    RestoreReadyFlow,
};
use crate::state::{SessionState, StateCache};
use crate::transaction::retry_plan;

const READ_CHUNK: usize = 16 * 1024;

pub struct Client {
    config: Config,
    stream: TcpStream,
    conn: Connection,
    registry: Arc<CodecRegistry>,
    cache: QueryCache,
    session: Arc<SessionState>,
    state_cache: StateCache,
    annotations: Option<Arc<Annotations>>,
    retry: RetryOptions,
}

impl Client {
    pub fn connect(config: Config) -> Result<Client, Error> {
        let registry = Arc::new(CodecRegistry::new());
        Client::connect_with(config, registry)
    }

    pub fn connect_with(config: Config, registry: Arc<CodecRegistry>) -> Result<Client, Error> {
        let stream = open_socket(&config)?;
        let (conn, mut flow) = Connection::connect(&config);
        let mut client = Client {
            config,
            stream,
            conn,
            registry,
            cache: QueryCache::new(),
            session: Arc::new(SessionState::new()),
            state_cache: StateCache::new(),
            annotations: None,
            retry: RetryOptions::default(),
        };
        client.run_flow(&mut flow)?;
        Ok(client)
    }

    pub fn with_retry_options(mut self, retry: RetryOptions) -> Client {
        self.retry = retry;
        self
    }

    pub fn with_default_module(mut self, module: Option<String>) -> Client {
        self.session = Arc::new(self.session.with_default_module(module));
        self
    }

    pub fn with_module_aliases(
        mut self,
        aliases: impl IntoIterator<Item = (String, String)>,
    ) -> Client {
        self.session = Arc::new(self.session.with_aliases(aliases));
        self
    }

    pub fn with_config(mut self, config: impl IntoIterator<Item = (String, Value)>) -> Client {
        self.session = Arc::new(self.session.with_config(config));
        self
    }

    pub fn with_globals(mut self, globals: impl IntoIterator<Item = (String, Value)>) -> Client {
        self.session = Arc::new(self.session.with_globals(globals));
        self
    }

    pub fn with_annotation(mut self, name: impl Into<String>, value: impl Into<String>) -> Client {
        let mut annotations = self.annotations.as_deref().cloned().unwrap_or_default();
        annotations.insert(name.into(), value.into());
        self.annotations = Some(Arc::new(annotations));
        self
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.conn.transaction_state()
    }

    pub fn query(&mut self, query: &str, args: impl Into<Arguments>) -> Result<Vec<Value>, Error> {
        let params = QueryParams::new(query, IoFormat::Binary);
        let flow = self.perform(&params, &args.into())?;
        Ok(flow.rows)
    }

    pub fn query_single(
        &mut self,
        query: &str,
        args: impl Into<Arguments>,
    ) -> Result<Option<Value>, Error> {
        let params = QueryParams::new(query, IoFormat::Binary).expect_one(false);
        let flow = self.perform(&params, &args.into())?;
        queries::single_row(flow.rows, false)
    }

    pub fn query_required_single(
        &mut self,
        query: &str,
        args: impl Into<Arguments>,
    ) -> Result<Value, Error> {
        let params = QueryParams::new(query, IoFormat::Binary).expect_one(true);
        let flow = self.perform(&params, &args.into())?;
        queries::single_row(flow.rows, true).map(|row| row.expect("required row is present"))
    }

    pub fn query_json(
        &mut self,
        query: &str,
        args: impl Into<Arguments>,
    ) -> Result<String, Error> {
        let params = QueryParams::new(query, IoFormat::Json);
        let flow = self.perform(&params, &args.into())?;
        queries::json_result(flow.rows)
    }

    pub fn query_single_json(
        &mut self,
        query: &str,
        args: impl Into<Arguments>,
    ) -> Result<String, Error> {
        let params = QueryParams::new(query, IoFormat::Json).expect_one(false);
        let flow = self.perform(&params, &args.into())?;
        queries::single_json(flow.rows, false)
    }

    pub fn execute(&mut self, query: &str, args: impl Into<Arguments>) -> Result<(), Error> {
        let params = QueryParams::new(query, IoFormat::Binary);
        self.perform(&params, &args.into())?;
        Ok(())
    }

    /// Run a retryable transaction.
    pub fn transaction<T>(
        &mut self,
        mut body: impl FnMut(&mut Transaction<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut attempt = 0;
        loop {
            self.statement("start transaction")?;
            let result = {
                let mut tx = Transaction { client: self };
                body(&mut tx)
            };
            let result: Result<T, Error> = match result {
                Ok(value) => match self.statement("commit") {
                    Ok(()) => return Ok(value),
                    Err(commit_error) => Err(commit_error),
                },
                Err(body_error) => {
                    if self.conn.is_consistent() {
                        if let Err(rollback_error) = self.statement("rollback") {
                            log::warn!("rollback after error failed: {rollback_error:#}");
                        }
                    }
                    Err(body_error)
                }
            };
            let Err(error) = result else {
                unreachable!("successful attempts return early")
            };
            match retry_plan(&self.retry, &error, attempt) {
                Some(delay) => {
                    log::info!("transaction failed, retrying in {delay:?}: {error:#}");
                    std::thread::sleep(delay);
                    attempt += 1;
                    if error.has_tag(SHOULD_RECONNECT) && self.reconnect().is_err() {
                        return Err(error);
                    }
                }
                None => return Err(error),
            }
        }
    }

    pub fn dump(&mut self, mut sink: impl FnMut(Bytes) -> Result<(), Error>) -> Result<Bytes, Error> {
        self.ensure_connected()?;
        self.conn.begin_request()?;
        self.conn.send(&[
            ClientMessage::Dump(gelx_protocol::client_message::Dump {
                annotations: self.request_annotations(),
                flags: gelx_protocol::common::DumpFlags::empty(),
            }),
            ClientMessage::Sync,
        ])?;
        let mut block_sink = |packet: gelx_protocol::server_message::RawPacket| sink(packet.data);
        let mut flow = DumpFlow::new(&mut block_sink);
        self.run_flow(&mut flow)?;
        if let Some(err) = flow.error {
            return Err(err.into());
        }
        flow.header
            .map(|packet| packet.data)
            .ok_or_else(|| ProtocolOutOfOrderError::with_message("dump ended without a header"))
    }

    pub fn restore(
        &mut self,
        header: Bytes,
        blocks: impl IntoIterator<Item = Bytes>,
    ) -> Result<String, Error> {
        self.ensure_connected()?;
        self.conn.begin_request()?;
        self.conn.send(&[ClientMessage::Restore(Restore {
            headers: Default::default(),
            jobs: 1,
            data: header,
        })])?;
        let mut ready = RestoreReadyFlow::new();
        if let Err(error) = self.run_flow(&mut ready) {
            self.conn.abort();
            return Err(error);
        }
        for block in blocks {
            self.conn
                .send(&[ClientMessage::RestoreBlock(RestoreBlock { data: block })])?;
            self.flush_writes()?;
            if let Some(error) = self.drain_restore_errors()? {
                self.conn.abort();
                return Err(error);
            }
        }
        self.conn.send(&[ClientMessage::RestoreEof, ClientMessage::Sync])?;
        let mut complete = RestoreCompleteFlow::new();
        self.run_flow(&mut complete)?;
        if let Some(err) = complete.error {
            return Err(err.into());
        }
        Ok(complete.status.unwrap_or_default())
    }

    pub fn close(&mut self) -> Result<(), Error> {
        if matches!(self.conn.phase(), Phase::Closed | Phase::Aborted) {
            return Ok(());
        }
        self.conn.terminate()?;
        self.flush_writes()?;
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        Ok(())
    }

    fn statement(&mut self, query: &str) -> Result<(), Error> {
        let params = QueryParams::new(query, IoFormat::Binary);
        self.perform_once(&params, &Arguments::new())?;
        Ok(())
    }

    fn request_annotations(&self) -> Option<Arc<Annotations>> {
        if self.conn.proto().is_3() {
            self.annotations.clone()
        } else {
            None
        }
    }

    fn perform(&mut self, params: &QueryParams, args: &Arguments) -> Result<ExecuteFlow, Error> {
        let mut attempt = 0;
        loop {
            match self.perform_once(params, args) {
                Ok(flow) => return Ok(flow),
                Err(error) => {
                    if !self.query_retry_allowed(params) {
                        return Err(error);
                    }
                    match retry_plan(&self.retry, &error, attempt) {
                        Some(delay) => {
                            log::info!("query failed, retrying in {delay:?}: {error:#}");
                            std::thread::sleep(delay);
                            attempt += 1;
                            if error.has_tag(SHOULD_RECONNECT) && self.reconnect().is_err() {
                                return Err(error);
                            }
                        }
                        None => return Err(error),
                    }
                }
            }
        }
    }

    fn query_retry_allowed(&mut self, params: &QueryParams) -> bool {
        if self.conn.transaction_state() != TransactionState::NotInTransaction {
            return false;
        }
        match self.cache.get(&params.fingerprint()) {
            Some(entry) => !entry.capabilities.intersects(Capabilities::MODIFICATIONS),
            None => true,
        }
    }

    fn perform_once(
        &mut self,
        params: &QueryParams,
        args: &Arguments,
    ) -> Result<ExecuteFlow, Error> {
        self.ensure_connected()?;
        let state = self
            .state_cache
            .encode(&self.session, self.conn.state_desc(), &self.registry)?;

        let entry = match self.cache.get(&params.fingerprint()) {
            Some(entry) => entry,
            None => self.parse(params, &state)?,
        };
        queries::check_cardinality(params, entry.cardinality)?;
        let arg_bytes = queries::encode_arguments(&*entry.in_codec, args)
            .map_err(|e| e.set::<gelx_errors::QueryText>(params.query.as_str()))?;

        let opts = params.compilation_options();
        self.conn.begin_request()?;
        self.conn.send(&[
            ClientMessage::Execute(Execute {
                annotations: self.request_annotations(),
                allowed_capabilities: opts.allow_capabilities,
                compilation_flags: opts.flags(),
                implicit_limit: opts.implicit_limit,
                output_format: opts.io_format,
                expected_cardinality: opts.expected_cardinality,
                command_text: params.query.clone(),
                state,
                input_typedesc_id: entry.in_codec.type_id(),
                output_typedesc_id: entry.out_codec.type_id(),
                arguments: arg_bytes,
                input_language: opts.input_language,
            }),
            ClientMessage::Sync,
        ])?;

        let mut flow = ExecuteFlow::new(entry.out_codec.clone(), self.registry.clone());
        self.run_flow(&mut flow)?;

        let mut in_codec = entry.in_codec.clone();
        if let Some(description) = &flow.description {
            let refreshed = CachedQuery {
                cardinality: description.result_cardinality,
                in_codec: description
                    .input()
                    .map_err(gelx_errors::ProtocolEncodingError::with_source)?
                    .build_codec(Some(&self.registry))
                    .map_err(gelx_errors::ProtocolEncodingError::with_source)?,
                out_codec: flow.out_codec.clone(),
                capabilities: description.capabilities,
            };
            in_codec = refreshed.in_codec.clone();
            self.cache.put(params.fingerprint(), refreshed);
        }
        for warning in &flow.warnings {
            log::warn!("server warning: {}", warning.message);
        }
        if let Some(response) = flow.error.take() {
            return Err(queries::resolve_error(
                response,
                &*in_codec,
                args,
                &params.query,
            ));
        }
        if let Some(decode_error) = flow.decode_error.take() {
            return Err(decode_error);
        }
        Ok(flow)
    }

    fn parse(
        &mut self,
        params: &QueryParams,
        state: &gelx_protocol::common::State,
    ) -> Result<CachedQuery, Error> {
        let opts = params.compilation_options();
        self.conn.begin_request()?;
        self.conn.send(&[
            ClientMessage::Parse(Parse::new(
                &opts,
                &params.query,
                state.clone(),
                self.request_annotations(),
            )),
            ClientMessage::Sync,
        ])?;
        let mut flow = ParseFlow::new();
        self.run_flow(&mut flow)?;
        for warning in &flow.warnings {
            log::warn!("server warning: {}", warning.message);
        }
        if let Some(response) = flow.error.take() {
            let error: Error = response.into();
            return Err(error.set::<gelx_errors::QueryText>(params.query.as_str()));
        }
        let description = flow.description.ok_or_else(|| {
            ProtocolOutOfOrderError::with_message("parse finished without a data description")
        })?;
        let entry = CachedQuery {
            cardinality: description.result_cardinality,
            in_codec: description
                .input()
                .map_err(gelx_errors::ProtocolEncodingError::with_source)?
                .build_codec(Some(&self.registry))
                .map_err(gelx_errors::ProtocolEncodingError::with_source)?,
            out_codec: description
                .output()
                .map_err(gelx_errors::ProtocolEncodingError::with_source)?
                .build_codec(Some(&self.registry))
                .map_err(gelx_errors::ProtocolEncodingError::with_source)?,
            capabilities: description.capabilities,
        };
        self.cache.put(params.fingerprint(), entry.clone());
        Ok(entry)
    }

    fn ensure_connected(&mut self) -> Result<(), Error> {
        match self.conn.phase() {
            Phase::Ready => Ok(()),
            Phase::Busy => {
                self.conn.abort();
                self.reconnect()
            }
            Phase::Closed | Phase::Aborted => self.reconnect(),
            Phase::Connecting | Phase::Authenticating => Err(
                gelx_errors::ClientInconsistentError::with_message("connection is mid-handshake"),
            ),
        }
    }

    fn reconnect(&mut self) -> Result<(), Error> {
        let stream = open_socket(&self.config)?;
        let (conn, mut flow) = Connection::connect(&self.config);
        self.stream = stream;
        self.conn = conn;
        self.state_cache = StateCache::new();
        self.run_flow(&mut flow)
    }

    fn run_flow(&mut self, flow: &mut dyn Flow) -> Result<(), Error> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.conn.advance(flow)? {
                Advance::Write(frame) => {
                    if let Err(io_error) = self.stream.write_all(&frame) {
                        self.conn.abort();
                        return Err(ClientConnectionError::with_source(io_error));
                    }
                }
                Advance::Read => {
                    self.stream
                        .set_read_timeout(self.config.wait_for_message_timeout)
                        .map_err(ClientConnectionError::with_source)?;
                    match self.stream.read(&mut buf) {
                        Ok(0) => {
                            self.conn.abort();
                            return Err(ClientConnectionClosedError::with_message(
                                "the server closed the connection",
                            ));
                        }
                        Ok(received) => self.conn.feed(&buf[..received]),
                        Err(io_error)
                            if matches!(
                                io_error.kind(),
                                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                            ) =>
                        {
                            self.conn.abort();
                            return Err(ClientConnectionTimeoutError::with_message(
                                "timed out waiting for a server message",
                            ));
                        }
                        Err(io_error) => {
                            self.conn.abort();
                            return Err(ClientConnectionError::with_source(io_error));
                        }
                    }
                }
                Advance::Done => return Ok(()),
            }
        }
    }

    fn flush_writes(&mut self) -> Result<(), Error> {
        while let Some(frame) = self.conn.next_outgoing() {
            if let Err(io_error) = self.stream.write_all(&frame) {
                self.conn.abort();
                return Err(ClientConnectionError::with_source(io_error));
            }
        }
        Ok(())
    }

    fn drain_restore_errors(&mut self) -> Result<Option<Error>, Error> {
        let mut buf = [0u8; READ_CHUNK];
        self.stream
            .set_nonblocking(true)
            .map_err(ClientConnectionError::with_source)?;
        let drained = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    break Err(ClientConnectionClosedError::with_message(
                        "the server closed the connection",
                    ));
                }
                Ok(received) => self.conn.feed(&buf[..received]),
                Err(io_error) if io_error.kind() == std::io::ErrorKind::WouldBlock => {
                    break Ok(());
                }
                Err(io_error) => break Err(ClientConnectionError::with_source(io_error)),
            }
        };
        self.stream
            .set_nonblocking(false)
            .map_err(ClientConnectionError::with_source)?;
        if let Err(error) = drained {
            self.conn.abort();
            return Err(error);
        }
        while let Some(message) = self.conn.poll_message()? {
            if let ServerMessage::ErrorResponse(response) = message {
                return Ok(Some(response.into()));
            }
        }
        Ok(None)
    }
}

/// A transaction handle passed to [`Client::transaction`] bodies.
pub struct Transaction<'a> {
    client: &'a mut Client,
}

impl Transaction<'_> {
    pub fn query(&mut self, query: &str, args: impl Into<Arguments>) -> Result<Vec<Value>, Error> {
        self.client.query(query, args)
    }
    pub fn query_single(
        &mut self,
        query: &str,
        args: impl Into<Arguments>,
    ) -> Result<Option<Value>, Error> {
        self.client.query_single(query, args)
    }
    pub fn query_json(
        &mut self,
        query: &str,
        args: impl Into<Arguments>,
    ) -> Result<String, Error> {
        self.client.query_json(query, args)
    }
    pub fn execute(&mut self, query: &str, args: impl Into<Arguments>) -> Result<(), Error> {
        self.client.execute(query, args)
    }
}

fn open_socket(config: &Config) -> Result<TcpStream, Error> {
    use std::net::ToSocketAddrs;
    let (host, port) = config.address();
    let address = (host.as_str(), port)
        .to_socket_addrs()
        .map_err(ClientConnectionFailedTemporarilyError::with_source)?
        .next()
        .ok_or_else(|| {
            ClientConnectionFailedTemporarilyError::with_message("host resolved to no address")
        })?;
    let stream = TcpStream::connect_timeout(&address, config.connect_timeout)
        .map_err(ClientConnectionFailedTemporarilyError::with_source)?;
    stream
        .set_nodelay(true)
        .map_err(ClientConnectionError::with_source)?;
    Ok(stream)
}
