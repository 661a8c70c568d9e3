use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use scursor::ReadCursor;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::common::frame::{Frame, FramedReader, FrameWriter, FunctionField};
use crate::common::function::FunctionCode;
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::exception::ExceptionCode;
use crate::server::device::DeviceIdentification;
use crate::server::handler::{DataHandler, RequestSource};
use crate::server::request::{to_exception, Request};

struct SessionTracker {
    id: u64,
    sessions: BTreeMap<u64, mpsc::Sender<()>>,
}

type SessionTrackerWrapper = Arc<Mutex<SessionTracker>>;

impl SessionTracker {
    fn wrapped() -> SessionTrackerWrapper {
        Arc::new(Mutex::new(Self {
            id: 0,
            sessions: BTreeMap::new(),
        }))
    }

    fn add(&mut self, sender: mpsc::Sender<()>) -> u64 {
        let id = self.id;
        self.id += 1;
        self.sessions.insert(id, sender);
        id
    }

    fn remove(&mut self, id: u64) {
        self.sessions.remove(&id);
    }
}

pub(crate) struct ServerTask {
    listener: TcpListener,
    handler: Arc<dyn DataHandler>,
    device: Option<Arc<DeviceIdentification>>,
    tracker: SessionTrackerWrapper,
    decode: DecodeLevel,
}

impl ServerTask {
    pub(crate) fn new(
        listener: TcpListener,
        handler: Arc<dyn DataHandler>,
        device: Option<Arc<DeviceIdentification>>,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            listener,
            handler,
            device,
            tracker: SessionTracker::wrapped(),
            decode,
        }
    }

    pub(crate) async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        // every session holds a clone of done_tx, so after signaling shutdown
        // the recv() below completes once the last worker has exited
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

        loop {
            tokio::select! {
               _ = shutdown.recv() => {
                    tracing::info!("server shutdown");
                    break;
               }
               result = self.listener.accept() => {
                   match result {
                        Err(err) => {
                            tracing::error!("error accepting connection: {}", err);
                            break;
                        }
                        Ok((socket, addr)) => {
                            self.handle(socket, addr, done_tx.clone());
                        }
                   }
               }
            }
        }

        // close the listener and signal every session, then wait for the
        // workers to finish their current frame
        drop(self.listener);
        self.tracker.lock().unwrap().sessions.clear();
        drop(done_tx);
        while done_rx.recv().await.is_some() {}
    }

    fn handle(&self, socket: TcpStream, addr: SocketAddr, done: mpsc::Sender<()>) {
        let decode = self.decode;
        let handler = self.handler.clone();
        let device = self.device.clone();
        let tracker = self.tracker.clone();
        let (tx, rx) = mpsc::channel(1);
        let span = tracing::Span::current();

        tracing::info!("accepted connection from: {}", addr);

        // register before spawning so a concurrent shutdown always sees the session
        let id = tracker.lock().unwrap().add(tx);

        tokio::spawn(async move {
            let mut session = SessionTask::new(
                PhysLayer::new_tcp(socket, decode.physical),
                addr,
                handler,
                device,
                rx,
                decode,
            );
            let result = session
                .run()
                .instrument(tracing::info_span!(parent: &span, "session", "remote" = ?addr))
                .await;
            match result {
                Err(RequestError::Shutdown) => tracing::info!("shutdown session: {}", id),
                Err(err) => tracing::warn!("session {} terminated: {}", id, err),
                Ok(()) => {}
            }
            tracker.lock().unwrap().remove(id);
            drop(done);
        });
    }
}

pub(crate) struct SessionTask {
    io: PhysLayer,
    peer: SocketAddr,
    handler: Arc<dyn DataHandler>,
    device: Option<Arc<DeviceIdentification>>,
    shutdown: mpsc::Receiver<()>,
    reader: FramedReader,
    writer: FrameWriter,
    decode: DecodeLevel,
}

impl SessionTask {
    fn new(
        io: PhysLayer,
        peer: SocketAddr,
        handler: Arc<dyn DataHandler>,
        device: Option<Arc<DeviceIdentification>>,
        shutdown: mpsc::Receiver<()>,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            io,
            peer,
            handler,
            device,
            shutdown,
            reader: FramedReader::new(),
            writer: FrameWriter::new(),
            decode,
        }
    }

    async fn run(&mut self) -> Result<(), RequestError> {
        loop {
            self.run_one().await?;
        }
    }

    async fn run_one(&mut self) -> Result<(), RequestError> {
        tokio::select! {
            frame = self.reader.next_frame(&mut self.io, self.decode.frame) => {
               self.reply_to_request(frame?).await
            }
            _ = self.shutdown.recv() => {
               Err(RequestError::Shutdown)
            }
        }
    }

    async fn reply_to_request(&mut self, frame: Frame) -> Result<(), RequestError> {
        let mut cursor = ReadCursor::new(frame.payload());

        let function_value = match cursor.read_u8() {
            Err(_) => {
                tracing::warn!("received an empty frame");
                return Ok(());
            }
            Ok(value) => value,
        };

        // if the unit id is refused, don't respond
        if !self.handler.accept_unit_id(frame.header.unit_id) {
            tracing::warn!(
                "ignoring frame for refused unit id: {}",
                frame.header.unit_id
            );
            return Ok(());
        }

        let function = match FunctionCode::get(function_value) {
            Some(x) => x,
            None => {
                tracing::warn!("received unknown function code: {}", function_value);
                let reply = self.writer.format_ex(
                    frame.header,
                    FunctionField::UnknownFunction(function_value),
                    ExceptionCode::IllegalFunction,
                    self.decode.frame,
                )?;
                return Ok(self.io.write(reply).await?);
            }
        };

        if self.decode.app.enabled() {
            tracing::info!("PDU RX - {}", function);
        }

        let source = RequestSource::new(self.peer, frame.header.unit_id);

        let reply: &[u8] = match Request::parse(function, &mut cursor) {
            Err(err) => {
                tracing::warn!("error parsing {} request: {}", function, err);
                self.writer.format_ex(
                    frame.header,
                    FunctionField::Exception(function),
                    to_exception(&err),
                    self.decode.frame,
                )?
            }
            Ok(request) => request.get_reply(
                frame.header,
                self.handler.as_ref(),
                self.device.as_deref(),
                &source,
                &mut self.writer,
                self.decode.frame,
            )?,
        };

        self.io.write(reply).await?;
        Ok(())
    }
}
