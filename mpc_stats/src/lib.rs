//! Privacy-preserving statistics over vertically partitioned data.
//!
//! Data owners of two verticals join their rows on shared key columns without
//! revealing them, then compute moments or a least-squares regression over the
//! joined rows. A dealer supplies correlated randomness and only the recipients
//! learn the result. [`startup::dispatch`] builds a party's root fronctocol.

pub mod config;
pub mod csv_input;
pub mod error;
pub mod fixed_point;
pub mod global;
pub mod house;
pub mod join;
pub mod moments;
pub mod payload;
pub mod regression;
pub mod startup;
pub mod table;

pub use config::{Query, StudyConfig};
pub use error::ConfigError;
pub use global::GlobalInfo;
pub use startup::{dispatch, Files, Launch, QueryResult};
