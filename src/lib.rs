//! Grade conversion and academic-record reconciliation.
//!
//! A student's completion history and raw-grade ledger are fetched from an
//! [`backend::AcademicBackend`], merged per subject by [`reconcile()`], and run
//! through a conversion rule with [`conversion::preview`]. Individual
//! conversions are persisted with [`conversion::ConversionService`];
//! institution changes go through [`transfer::TransferEquivalencyCoordinator`].

pub mod backend;
pub mod config;
pub mod conversion;
pub mod error;
pub mod http;
pub mod matcher;
pub mod memory;
pub mod models;
pub mod reconcile;
pub mod report;
pub mod snapshot;
pub mod transfer;

pub use conversion::{preview, ConversionService};
pub use error::{BackendError, CoreError, CoreResult};
pub use reconcile::reconcile;
pub use transfer::TransferEquivalencyCoordinator;
