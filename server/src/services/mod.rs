//! Ticket workflows shared by the HTTP handlers and the batch utilities.

pub mod batch;
pub mod cleanup;
pub mod import;
pub mod reconcile;
pub mod scan;

pub use batch::{fan_out, BatchReport, Outcome};
pub use reconcile::{convert, materialize, settle, Materialized, Settlement};
pub use scan::admit_scan;
