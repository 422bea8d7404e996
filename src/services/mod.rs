//! Workflow services.
//!
//! Services orchestrate the storage backends and the command channel. Each is
//! a cheap clone over shared handles; [`ServiceContainer`] builds them.

mod attendance;
mod container;
mod device;
mod enrollment;
mod matcher;
mod reconcile;
mod template_store;

pub use attendance::{AttendanceReceipt, AttendanceService, Identification};
pub use container::ServiceContainer;
pub use device::{CommandReceipt, DeviceService};
pub use enrollment::{EnrollmentReceipt, EnrollmentService, RegistrationReceipt};
pub use matcher::SimilarityMatcher;
pub use reconcile::{ReconcileReport, ReconcileService, SchemeStatus};
pub use template_store::TemplateStore;
