//! Logging and audit sinks shared by the association, DIMSE service,
//! and connection-pool crates.
//!
//! [`structured`] is the general-purpose, level/category-filtered
//! event stream that every subsystem reaches for. [`audit`] is the
//! narrower, IHE ATNA-shaped trail of who did what to which SOP
//! instance, kept separate because its retention and rotation
//! requirements differ from ordinary diagnostic logging.

pub mod audit;
pub mod structured;

pub use audit::{
    AuditEntry, AuditHandler, AuditLogger, ConsoleAuditHandler, EventType, FileAuditHandler,
    FileHandlerError, Outcome, Participant, UnifiedLoggingHandler,
};
pub use structured::{Category, Level, LogHandler, Message, StructuredLogger, TracingHandler};
