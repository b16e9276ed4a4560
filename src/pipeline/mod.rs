// Quality pipeline stages and the orchestrator that sequences them.

pub mod auditor;
pub mod orchestrator;
pub mod quality;
pub mod validator;

pub use auditor::{AuditReport, AuditStats, BatchAuditor, ConsistencyAudit};
pub use orchestrator::{AggregatedIssue, OrchestrationResult, Orchestrator, Verdict};
pub use quality::{FinalReview, QcReport, QcStats, QualityController};
pub use validator::{BatchValidator, StructuralCheck, ValidationReport, ValidationStats};
