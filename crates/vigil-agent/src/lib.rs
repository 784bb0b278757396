//! Agent-side plugin intake subsystem: the attachment registrar and the
//! per-worker inspection loop that sits behind it.
//!
//! The binary (`main.rs`) is a thin wiring layer over this library: it
//! loads configuration, starts the registrar, and spawns one
//! [`inspection::InspectionWorker`] per attachment the registrar reports.

pub mod http_manager;
pub mod inspection;
pub mod metrics;
pub mod registrar;
pub mod ring;
pub mod session;
pub mod source_identifier;
pub mod verdict_responder;

pub use http_manager::{AlwaysAcceptManager, HttpManager, InspectionInput, InspectionPayload};
pub use inspection::InspectionWorker;
pub use metrics::{WorkerMetrics, WorkerMetricsSnapshot};
pub use registrar::{AttachmentRegistrar, RegisteredInstance};
