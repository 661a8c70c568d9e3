//! A Modbus/TCP client and server implementation using [Tokio](https://docs.rs/tokio)
//! and Rust's `async/await` syntax.
//!
//! # Features
//!
//! * Panic-free parsing
//! * Client with automatic open/close policy and last-error classification
//! * Multi-connection server over a thread-safe in-memory data bank
//! * Change notifications for wire-driven and internal writes
//! * Per-instance wire decoding at the application, frame, and physical layer
//!
//! # Supported functions
//!
//! * Read Coils (0x01)
//! * Read Discrete Inputs (0x02)
//! * Read Holding Registers (0x03)
//! * Read Input Registers (0x04)
//! * Write Single Coil (0x05)
//! * Write Single Register (0x06)
//! * Write Multiple Coils (0x0F)
//! * Write Multiple Registers (0x10)
//! * Read/Write Multiple Registers (0x17)
//! * Read Device Identification (0x2B / MEI 0x0E)
//!
//! # Client example
//!
//! ```no_run
//! use mbtcp::client::{ClientConfig, ModbusClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         host: "10.0.0.7".to_string(),
//!         ..Default::default()
//!     };
//!     let mut client = ModbusClient::new(config)?;
//!
//!     match client.read_holding_registers(0, 4).await {
//!         Ok(values) => println!("registers: {values:?}"),
//!         Err(err) => println!("error: {err} (last error: {})", client.last_error()),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Server example
//!
//! ```no_run
//! use mbtcp::server::{ModbusServer, ServerConfig, WriteOrigin};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = ModbusServer::new(ServerConfig::default());
//!
//!     let bank = server.handler().data_bank();
//!     bank.set_holding_registers(0, &[0, 111, 0, 0], WriteOrigin::Internal)?;
//!     bank.subscribe(|notice| println!("changed: {notice:?}"));
//!
//!     server.serve_forever().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_import_braces,
    unused_qualifications
)]

/// client API
pub mod client;
/// public constant values related to the Modbus specification
pub mod constants;
/// server API
pub mod server;

mod common;
mod decode;
mod error;
mod exception;
mod tcp;
mod types;

pub use crate::decode::*;
pub use crate::error::*;
pub use crate::exception::*;
pub use crate::types::*;
