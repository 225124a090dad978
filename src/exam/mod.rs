//! Exam sessions, the storage collaborator, and the lifecycle scheduler.

pub mod scheduler;
pub mod session;
pub mod store;

pub use scheduler::{CycleReport, ExamLifecycleScheduler};
pub use session::{ExamSession, ExamStatus, IncidentReport, IncidentType};
pub use store::{ExamStore, InMemoryExamStore};
