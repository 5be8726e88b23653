//! Deciding whether a destination host is this machine.

use std::sync::{Arc, OnceLock};

static MACHINE_HOST_NAME: OnceLock<Arc<MachineHostName>> = OnceLock::new();

/// Predicate consulted by outgoing batches before connecting.
///
/// When it matches, the batch connects over loopback instead of resolving
/// the destination host name.
pub trait LocalHost: Send + Sync + std::fmt::Debug {
    fn is_local(&self, host: &str) -> bool;
}

/// Matches the machine host name, looked up once at construction.
#[derive(Debug, Clone)]
pub struct MachineHostName {
    name: String,
}

impl MachineHostName {
    /// Look up the host name of this machine.
    pub fn resolve() -> Self {
        let name = gethostname::gethostname().to_string_lossy().into_owned();
        tracing::debug!(host_name = %name, "Resolved local host name");
        Self { name }
    }

    /// The machine host name, looked up on first use and cached for the process.
    pub fn shared() -> Arc<MachineHostName> {
        Arc::clone(MACHINE_HOST_NAME.get_or_init(|| Arc::new(Self::resolve())))
    }

    /// Use a fixed name instead of the machine's.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl LocalHost for MachineHostName {
    fn is_local(&self, host: &str) -> bool {
        !self.name.is_empty() && self.name.eq_ignore_ascii_case(host)
    }
}

/// Never matches; every destination goes through name resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverLocal;

impl LocalHost for NeverLocal {
    fn is_local(&self, _host: &str) -> bool {
        false
    }
}
