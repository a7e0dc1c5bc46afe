use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedFault(pub String);

/// Test hook for simulating engine failures at specific call sites.
pub trait FaultInjector: Send + Sync {
    /// Consulted every time the pool opens a new database connection.
    fn on_new_connection(&self) -> Result<(), InjectedFault> {
        Ok(())
    }

    /// Observes unexpected errors that an accessor swallowed.
    fn on_fatal_error(&self, _err: &StorageError) {}
}
