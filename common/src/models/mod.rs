//! Shared data models.

pub mod catalog;
pub mod connection;
pub mod driver;
pub mod query;

pub use catalog::{QueryNode, QueryNodeType};
pub use connection::{
    ConnectionRequest, ConnectionSpec, ConnectionStatus, ConnectionTestResult, TunnelSpec,
};
pub use driver::{DatabaseFamily, DriverDescriptor};
pub use query::{ExecuteRequest, ResultTable};
