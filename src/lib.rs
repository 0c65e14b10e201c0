//! taghub: field-bus tag server.
//!
//! Periodically reads Modbus holding registers over a serial line,
//! aggregates the raw values into named tags, and serves those tags and
//! recent poll events over an HTTP API.
//!
//! # Structure
//!
//! - [`config`] - JSON5 configuration and validation
//! - [`coalesce`] - sparse addresses -> bounded read requests
//! - [`registry`] - shared tag state
//! - [`events`] - bounded FIFO event cache
//! - [`transport`] - the register-read primitive and its Modbus RTU impl
//! - [`poller`] - the perpetual poll scheduler
//! - [`gateway`] - read/write operations over the shared state
//! - [`http`] - the axum API surface

pub mod coalesce;
pub mod config;
pub mod events;
pub mod gateway;
pub mod http;
pub mod poller;
pub mod registry;
pub mod transport;

pub use coalesce::{ReadRequest, address_map};
pub use config::{TagHubConfig, TagType};
pub use events::{Event, EventCache, SharedEvents};
pub use gateway::{GatewayError, TagGateway};
pub use http::HttpServer;
pub use poller::PollScheduler;
pub use registry::{SharedRegistry, Tag, TagRegistry};
pub use transport::{ModbusRtuSource, RegisterSource, TransportError};
