use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::decode::DecodeLevel;
use crate::server::task::ServerTask;

pub(crate) mod databank;
pub(crate) mod device;
pub(crate) mod handler;
pub(crate) mod request;
pub(crate) mod task;

pub use databank::*;
pub use device::DeviceIdentification;
pub use handler::*;

/// Fine for this to be a constant since the channel is only used to signal shutdown
pub(crate) const SHUTDOWN_CHANNEL_CAPACITY: usize = 8;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// IPv4 or IPv6 address to bind the listener on
    pub host: IpAddr,
    /// TCP port to bind the listener on
    pub port: u16,
    /// Wire-level logging, injected into every session
    pub decode: DecodeLevel,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 502,
            decode: DecodeLevel::nothing(),
        }
    }
}

impl ServerConfig {
    fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

struct Running {
    local_addr: SocketAddr,
    // dropping the sender signals the accept task to stop
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

/// Modbus/TCP server.
///
/// Accepts concurrent connections and dispatches decoded requests to a
/// [`DataHandler`] backed by a shared [`DataBank`]. Each accepted connection
/// runs on its own task; the bank is the only shared mutable state and is
/// internally synchronized.
pub struct ModbusServer {
    config: ServerConfig,
    handler: Arc<dyn DataHandler>,
    device: Option<Arc<DeviceIdentification>>,
    running: Option<Running>,
}

impl ModbusServer {
    /// Create a server over a fresh [`DataBank`] with default capacities and
    /// the stock [`BankDataHandler`]
    pub fn new(config: ServerConfig) -> Self {
        Self::with_handler(
            config,
            Arc::new(BankDataHandler::new(Arc::new(DataBank::new()))),
        )
    }

    /// Create a server that dispatches requests to a custom [`DataHandler`]
    pub fn with_handler(config: ServerConfig, handler: Arc<dyn DataHandler>) -> Self {
        Self {
            config,
            handler,
            device: None,
            running: None,
        }
    }

    /// Handler dispatch target; its [`DataHandler::data_bank`] gives access to
    /// the underlying data model
    pub fn handler(&self) -> &Arc<dyn DataHandler> {
        &self.handler
    }

    /// Install the object store served in response to read device
    /// identification requests. Without one, the server answers those
    /// requests with exception 0x02.
    pub fn set_device_identification(&mut self, device: DeviceIdentification) {
        self.device = Some(Arc::new(device));
    }

    /// Bind the listener and spawn the accept task. Does nothing if the
    /// server is already running.
    pub async fn start(&mut self) -> Result<(), std::io::Error> {
        if self.running.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(SHUTDOWN_CHANNEL_CAPACITY);
        let task = ServerTask::new(
            listener,
            self.handler.clone(),
            self.device.clone(),
            self.config.decode,
        );
        let join = tokio::spawn(
            task.run(shutdown_rx)
                .instrument(tracing::info_span!("modbus-server", "listen" = ?local_addr)),
        );

        self.running = Some(Running {
            local_addr,
            shutdown_tx,
            join,
        });
        Ok(())
    }

    /// Close the listener, signal every worker, and wait until each has
    /// finished at most one in-flight frame. Does nothing if the server is
    /// already stopped.
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            drop(running.shutdown_tx);
            running.join.await.ok();
        }
    }

    /// Whether the accept task is running
    pub fn is_running(&self) -> bool {
        match &self.running {
            Some(running) => !running.join.is_finished(),
            None => false,
        }
    }

    /// Address the listener is bound to, available while running. Useful when
    /// binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Start the server if needed and serve until the accept task exits
    pub async fn serve_forever(&mut self) -> Result<(), std::io::Error> {
        self.start().await?;
        if let Some(running) = self.running.take() {
            running.join.await.ok();
        }
        Ok(())
    }
}

impl Drop for ModbusServer {
    fn drop(&mut self) {
        // signal the accept task, workers drain on their own
        self.running.take();
    }
}
