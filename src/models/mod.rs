pub mod audit_log;
pub mod item;
pub mod task;

// Re-export core models for easy access
pub use audit_log::{AuditLogEntry, NewAuditLogEntry};
pub use item::{Item, MediaKind, NewItem};
pub use task::{NewTask, Task, TaskFlow};
