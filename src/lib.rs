//! Declarative HTTP test execution.
//!
//! A [`TestCase`] describes one request and the assertions on its
//! response. [`DefaultCaseExecutor`] runs a case against an
//! [`Environment`], and [`SuiteRunner`] runs an ordered suite, carrying
//! extracted values from earlier cases into later ones.

pub mod config;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod model;
pub mod runner;
pub mod substitution;
pub mod validator;

pub use config::*;
pub use error::*;
pub use executor::*;
pub use model::*;
pub use runner::*;
pub use validator::*;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
