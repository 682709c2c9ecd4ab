//! OLD instances: building, tearing down and reporting on them.
//!
//! Layout on the server:
//! - `<apps>/<name>old/` - instance files, `production.ini`, `old.pid`
//! - `<apps>/<name>old/log/` - paster log
//! - `<apps>/log/` - Apache logs shared by every instance
//! - one shared virtual-hosts file proxying `/<name>old/` to each instance's port

mod cleanup;
mod crud;
mod deploy;
mod lifecycle;
mod predicates;
mod types;

// Re-export types
pub use types::{Context, InstanceDescriptor, RunState, ServerEntry};

pub use predicates::SuccessPredicate;

// Re-export build and teardown
pub use cleanup::{rollback, RollbackMode, RollbackReport};
pub use crud::{destroy_instance, format_listing, server_entries, write_dative_servers};
pub use deploy::{build_instance, preflight, Provisioning};

// Re-export lifecycle
pub use lifecycle::serve_shell_line;
