//! Database connectivity core.
//!
//! - [`registry`] discovers driver plugins and resolves driver handles.
//! - [`engines`] holds the statically linked database engines.
//! - [`tunnel`] opens SSH port forwards and rewrites URLs onto them.
//! - [`session`] owns the single active session.
//! - [`executor`] runs SQL and builds result tables.
//! - [`convert`] normalizes native values into JSON.

pub mod convert;
pub mod engines;
pub mod executor;
pub mod registry;
pub mod session;
pub mod tunnel;
pub mod value;

pub use convert::{ConverterRegistry, TypeConverter};
pub use engines::{DatabaseDriver, DriverHandle, Session};
pub use executor::QueryExecutor;
pub use registry::DriverRegistry;
pub use session::ConnectionManager;
pub use tunnel::{SshTunnelOpener, Tunnel, TunnelOpener};
pub use value::NativeValue;
