use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Names one execution and its remote workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunIdentity(String);

impl RunIdentity {
    pub fn generate() -> Self {
        Self::at(SystemTime::now())
    }

    pub fn at(now: SystemTime) -> Self {
        let stamp = humantime::format_rfc3339_micros(now)
            .to_string()
            .replace(':', "_");
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("run-{stamp}-{seq:04}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
