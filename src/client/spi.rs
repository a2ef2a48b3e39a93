//! A111 client for modules on SPI.
//!
//! A worker thread owns the link. The host sends it commands and gets one
//! reply per command back. While a session runs, the worker polls `status`
//! for `data_ready`, reads each frame out of the main buffer and queues it on
//! a bounded frame channel; errors found while polling travel the same way so
//! only `get_next` sees them. The link is handed back when the worker is shut
//! down.

use bytes::Bytes;
use log::{debug, error, info, trace};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::module;
use super::{SensorGeneration, ServerInfo, Session};
use crate::a111::{Frame, Metadata, Mode, ResultInfo, ServiceConfig};
use crate::error::{ClientError, LinkError};
use crate::link::{Link, DEFAULT_TIMEOUT};
use crate::protocol::frame::{RegisterProtocol, MAIN_BUFFER};
use crate::protocol::json::{decode_stream_payload, ByteOrder, DecodeParams};
use crate::registers::{status_table, Value};

const POLL_INTERVAL: Duration = Duration::from_millis(1);
const REPLY_MARGIN: Duration = Duration::from_secs(1);
/// Frames the worker reads ahead of `get_next`.
const FRAME_QUEUE: usize = 16;

enum Command {
    Connect,
    Setup(Box<ServiceConfig>),
    Start,
    Stop,
    SetTimeout(Duration),
    Disconnect,
}

enum Reply {
    Connected(Box<ServerInfo>),
    SetUp(Box<Metadata>),
    Started,
    Stopped,
    Disconnected,
    Failed(ClientError),
}

type Polled = Result<(ResultInfo, Bytes), ClientError>;

impl Reply {
    fn kind(&self) -> &'static str {
        match self {
            Reply::Connected(_) => "connected",
            Reply::SetUp(_) => "setup",
            Reply::Started => "started",
            Reply::Stopped => "stopped",
            Reply::Disconnected => "disconnected",
            Reply::Failed(_) => "failed",
        }
    }
}

struct Worker<L: Link> {
    proto: RegisterProtocol<L>,
    result_info: Vec<u8>,
    mode: Option<Mode>,
    streaming: bool,
    /// Polled frame or error waiting for room in the frame queue.
    pending: Option<Polled>,
}

impl<L: Link> Worker<L> {
    fn run(mut self, commands: Receiver<Command>, replies: Sender<Reply>, frames: SyncSender<Polled>) -> L {
        loop {
            let command = if self.streaming || self.pending.is_some() {
                match commands.try_recv() {
                    Ok(c) => Some(c),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match commands.recv() {
                    Ok(c) => Some(c),
                    Err(_) => break,
                }
            };

            let reply = match command {
                Some(Command::Disconnect) => {
                    let reply = match self.disconnect() {
                        Ok(()) => Reply::Disconnected,
                        Err(e) => Reply::Failed(e),
                    };
                    let _ = replies.send(reply);
                    break;
                }
                Some(command) => self.handle(command),
                None => {
                    if !self.deliver(&frames) {
                        break;
                    }
                    None
                }
            };
            if let Some(reply) = reply {
                if replies.send(reply).is_err() {
                    break;
                }
            }
        }
        debug!("SPI worker exiting");
        self.proto.into_inner()
    }

    /// Push the pending item or poll for a new one; false once the host is gone.
    fn deliver(&mut self, frames: &SyncSender<Polled>) -> bool {
        if self.pending.is_none() && self.streaming {
            match self.poll_frame() {
                Ok(Some(frame)) => self.pending = Some(Ok(frame)),
                Ok(None) => {}
                Err(e) => {
                    self.streaming = false;
                    self.pending = Some(Err(e));
                }
            }
        }
        match self.pending.take() {
            Some(item) => match frames.try_send(item) {
                Ok(()) => true,
                Err(TrySendError::Full(item)) => {
                    self.pending = Some(item);
                    thread::sleep(POLL_INTERVAL);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
            None => {
                thread::sleep(POLL_INTERVAL);
                true
            }
        }
    }

    fn handle(&mut self, command: Command) -> Option<Reply> {
        let result = match command {
            Command::Connect => self.connect().map(|info| Reply::Connected(Box::new(info))),
            Command::Setup(config) => {
                let timeout = self.proto.link().timeout();
                self.mode = Some(config.mode());
                module::setup(&mut self.proto, &config, timeout).map(|m| Reply::SetUp(Box::new(m)))
            }
            Command::Start => self
                .proto
                .write_register("main_control", None, &Value::from("activate"))
                .map(|_| {
                    self.streaming = true;
                    Reply::Started
                }),
            Command::Stop => {
                self.streaming = false;
                self.pending = None;
                self.proto
                    .write_register("main_control", None, &Value::from("stop"))
                    .map(|_| Reply::Stopped)
            }
            Command::SetTimeout(timeout) => {
                self.proto.link_mut().set_timeout(timeout);
                return None;
            }
            Command::Disconnect => self.disconnect().map(|_| Reply::Disconnected),
        };
        Some(result.unwrap_or_else(Reply::Failed))
    }

    fn connect(&mut self) -> Result<ServerInfo, ClientError> {
        self.proto.reset();
        self.proto.link_mut().connect()?;
        let identified = module::probe(&mut self.proto).and_then(|ok| {
            if ok {
                module::server_info(&mut self.proto)
            } else {
                Err(ClientError::Client("no A111 module answered on SPI".into()))
            }
        });
        if identified.is_err() {
            if let Err(e) = self.proto.link_mut().disconnect() {
                debug!("disconnect after failed SPI probe failed: {}", e);
            }
        }
        identified
    }

    fn disconnect(&mut self) -> Result<(), ClientError> {
        self.streaming = false;
        self.pending = None;
        match self.proto.link_mut().disconnect() {
            Ok(()) | Err(LinkError::NotConnected) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// One status poll; reads the frame out if one is ready.
    fn poll_frame(&mut self) -> Result<Option<(ResultInfo, Bytes)>, ClientError> {
        let table = status_table()?;
        let bits = module::read_status(&mut self.proto)?;
        if table.has_error(bits) {
            return Err(ClientError::Server(format!(
                "module reported {}",
                table.errors(bits).join(", ")
            )));
        }
        if bits & table.data_ready == 0 {
            return Ok(None);
        }
        let mut entries = Vec::with_capacity(self.result_info.len());
        for &address in &self.result_info {
            entries.push((address, self.proto.read_register_raw(address)?));
        }
        let buffer = self.proto.read_buffer(MAIN_BUFFER, 0)?;
        self.proto
            .write_register("main_control", None, &Value::from("clear_status"))?;
        trace!("SPI frame of {} bytes", buffer.len());
        let info = module::result_info(&entries, self.mode)?;
        Ok(Some((info, buffer)))
    }
}

struct WorkerHandle<L> {
    commands: Sender<Command>,
    replies: Receiver<Reply>,
    frames: Receiver<Polled>,
    thread: JoinHandle<L>,
}

impl<L> WorkerHandle<L> {
    /// Throw away frames and stream errors left from an earlier session.
    fn drain_frames(&self) {
        let mut dropped = 0usize;
        while let Ok(item) = self.frames.try_recv() {
            match item {
                Ok(_) => dropped += 1,
                Err(e) => debug!("Discarding stream error from an earlier session: {}", e),
            }
        }
        if dropped > 0 {
            debug!("Dropped {} queued frames", dropped);
        }
    }
}

pub struct SpiClient<L: Link + 'static> {
    link: Option<L>,
    worker: Option<WorkerHandle<L>>,
    timeout: Duration,
    config: Option<ServiceConfig>,
    squeeze: bool,
}

impl<L: Link + 'static> SpiClient<L> {
    pub fn new(link: L) -> Self {
        Self {
            link: Some(link),
            worker: None,
            timeout: DEFAULT_TIMEOUT,
            config: None,
            squeeze: true,
        }
    }

    /// The link, when no worker currently owns it.
    pub fn link(&self) -> Option<&L> {
        self.link.as_ref()
    }

    fn spawn_worker(&mut self) -> Result<(), ClientError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let mut link = self
            .link
            .take()
            .ok_or_else(|| ClientError::Client("SPI link was lost by a failed worker".into()))?;
        link.set_timeout(self.timeout);
        let worker = Worker {
            proto: RegisterProtocol::new(link),
            result_info: module::result_info_addresses()?,
            mode: None,
            streaming: false,
            pending: None,
        };
        let (command_tx, command_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let (frame_tx, frame_rx) = mpsc::sync_channel(FRAME_QUEUE);
        let thread = thread::Builder::new()
            .name("spi-worker".into())
            .spawn(move || worker.run(command_rx, reply_tx, frame_tx))
            .map_err(LinkError::Io)?;
        self.worker = Some(WorkerHandle {
            commands: command_tx,
            replies: reply_rx,
            frames: frame_rx,
            thread,
        });
        Ok(())
    }

    /// Stop the worker and take the link back.
    fn shutdown(&mut self) -> Result<(), ClientError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let mut result = Ok(());
        if worker.commands.send(Command::Disconnect).is_ok() {
            loop {
                match worker.replies.recv_timeout(self.reply_timeout()) {
                    Ok(Reply::Disconnected) => break,
                    Ok(Reply::Failed(e)) => {
                        result = Err(e);
                        break;
                    }
                    Ok(other) => debug!("SPI worker sent {} while shutting down", other.kind()),
                    Err(_) => break,
                }
            }
        }
        drop(worker.commands);
        match worker.thread.join() {
            Ok(link) => self.link = Some(link),
            Err(_) => {
                error!("SPI worker panicked; link is gone");
                result = Err(ClientError::Client("SPI worker panicked".into()));
            }
        }
        result
    }

    fn reply_timeout(&self) -> Duration {
        self.timeout.saturating_mul(2) + REPLY_MARGIN
    }

    fn worker(&self) -> Result<&WorkerHandle<L>, ClientError> {
        self.worker.as_ref().ok_or(ClientError::State("not connected"))
    }

    /// Send a command and wait for its reply. The worker answers every
    /// command exactly once, in order.
    fn request(&mut self, command: Command) -> Result<Reply, ClientError> {
        let timeout = self.reply_timeout();
        let worker = self.worker()?;
        if !matches!(command, Command::Stop) {
            worker.drain_frames();
        }
        worker
            .commands
            .send(command)
            .map_err(|_| ClientError::Client("SPI worker is gone".into()))?;
        let reply = match worker.replies.recv_timeout(timeout) {
            Ok(Reply::Failed(e)) => Err(e),
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => Err(LinkError::Timeout(timeout).into()),
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::Client("SPI worker is gone".into())),
        };
        if matches!(reply, Ok(Reply::Stopped)) {
            worker.drain_frames();
        }
        reply
    }
}

fn unexpected(expected: &str, reply: &Reply) -> ClientError {
    ClientError::UnexpectedResponse {
        expected: expected.to_string(),
        got: reply.kind().to_string(),
    }
}

impl<L: Link + 'static> Session for SpiClient<L> {
    type Config = ServiceConfig;
    type Metadata = Metadata;
    type Frame = Frame;

    const GENERATION: SensorGeneration = SensorGeneration::A111;

    fn connect(&mut self) -> Result<ServerInfo, ClientError> {
        self.spawn_worker()?;
        match self.request(Command::Connect) {
            Ok(Reply::Connected(info)) => {
                info!("SPI module {}", info.version_string);
                Ok(*info)
            }
            Ok(other) => {
                if let Err(e) = self.shutdown() {
                    debug!("SPI shutdown after failed connect failed: {}", e);
                }
                Err(unexpected("connected", &other))
            }
            Err(e) => {
                if let Err(e) = self.shutdown() {
                    debug!("SPI shutdown after failed connect failed: {}", e);
                }
                Err(e)
            }
        }
    }

    fn setup_session(&mut self, config: &ServiceConfig) -> Result<Metadata, ClientError> {
        match self.request(Command::Setup(Box::new(config.clone())))? {
            Reply::SetUp(metadata) => {
                self.config = Some(config.clone());
                Ok(*metadata)
            }
            other => Err(unexpected("setup", &other)),
        }
    }

    fn start_session(&mut self) -> Result<(), ClientError> {
        match self.request(Command::Start)? {
            Reply::Started => Ok(()),
            other => Err(unexpected("started", &other)),
        }
    }

    fn get_next(&mut self) -> Result<Frame, ClientError> {
        let config = self
            .config
            .as_ref()
            .ok_or(ClientError::State("session needs to be set up before starting"))?;
        let worker = self.worker()?;
        let (info, buffer) = match worker.frames.recv_timeout(self.timeout) {
            Ok(polled) => polled?,
            Err(RecvTimeoutError::Timeout) => return Err(LinkError::Timeout(self.timeout).into()),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ClientError::Client("SPI worker is gone".into()))
            }
        };
        let params = DecodeParams {
            mode: config.mode(),
            num_sensors: 1,
            sweeps_per_frame: config.sweeps_per_frame().unwrap_or(1) as usize,
            squeeze: self.squeeze,
            byte_order: ByteOrder::Little,
        };
        let data = decode_stream_payload(&buffer, &params)?;
        Ok(Frame { info: vec![info], data })
    }

    fn stop_session(&mut self) -> Result<(), ClientError> {
        match self.request(Command::Stop)? {
            Reply::Stopped => Ok(()),
            other => Err(unexpected("stopped", &other)),
        }
    }

    fn disconnect(&mut self) -> Result<(), ClientError> {
        self.config = None;
        self.shutdown()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        match &self.worker {
            Some(worker) => {
                if worker.commands.send(Command::SetTimeout(timeout)).is_err() {
                    debug!("SPI worker is gone; timeout not forwarded");
                }
            }
            None => {
                if let Some(link) = self.link.as_mut() {
                    link.set_timeout(timeout);
                }
            }
        }
    }

    fn set_squeeze(&mut self, squeeze: bool) {
        self.squeeze = squeeze;
    }
}

impl<L: Link + 'static> Drop for SpiClient<L> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.commands.send(Command::Disconnect);
        }
    }
}
