//! A computation graph engine for labeled, multi-dimensional, unit-aware
//! quantities.
//!
//! A [`Computer`] holds a [`Graph`] of [`Key`]-addressed [`Task`]s and
//! evaluates them on demand via [`Computer::get`], culling to the requested
//! key's dependency closure and evaluating each task exactly once per call
//! through a built-in [`ops::OperatorRegistry`] of unit-aware array
//! operators acting on [`Quantity`] values.

pub mod computer;
pub mod error;
pub mod graph;
pub mod key;
pub mod ops;
pub mod quantity;
pub mod task;
pub mod units;
pub mod value;

pub use computer::{AddSpec, Computer, Fail};
pub use error::{Error, Result};
pub use graph::Graph;
pub use key::Key;
pub use ops::OperatorRegistry;
pub use quantity::{Label, Quantity};
pub use task::{Task, TaskArg};
pub use units::{EnvConfig, Unit};
pub use value::Value;
