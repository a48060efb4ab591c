use std::env;
use std::time::Duration;

use camino::Utf8PathBuf;

#[cfg(unix)]
use nix::unistd::geteuid;

use crate::options::PortRange;

/// Lowest port sampled when no port hint is configured.
pub const DEFAULT_PORT_MIN: u16 = 20_000;

/// Highest port sampled when no port hint is configured.
pub const DEFAULT_PORT_MAX: u16 = 39_999;

/// Default ceiling on how long a freshly launched engine may take to accept
/// connections.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of port-conflict retries before the conflict is surfaced.
pub const DEFAULT_MAX_PORT_CONFLICT_RETRIES: u32 = 5;

/// Default number of retries after the engine failed to become reachable.
pub const DEFAULT_MAX_INIT_FAILURE_RETRIES: u32 = 2;

/// Root password applied after the first successful start.
pub const DEFAULT_ROOT_PASSWORD: &str = "fixturedb";

/// Default log filter expression for test telemetry.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Port range sampled in random mode.
#[must_use]
pub const fn default_port_range() -> PortRange {
    PortRange::new_unchecked(DEFAULT_PORT_MIN, DEFAULT_PORT_MAX)
}

/// Directory that holds one subdirectory per supervised instance.
///
/// Lives under the system temporary directory, namespaced by effective user
/// so concurrent users on a shared build host do not collide.
#[must_use]
pub fn default_base_path() -> Utf8PathBuf {
    let mut base = fallback_temp_directory();
    base.push("fixturedb");
    #[cfg(unix)]
    base.push(format!("uid-{}", geteuid().as_raw()));
    base
}

fn fallback_temp_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_is_namespaced_under_temp() {
        let base = default_base_path();
        let rendered = base.as_str();
        assert!(rendered.contains("fixturedb"), "unexpected base: {rendered}");
        #[cfg(unix)]
        assert!(
            base.file_name().is_some_and(|tail| tail.starts_with("uid-")),
            "expected uid namespace in {rendered}"
        );
    }

    #[test]
    fn default_range_is_ordered() {
        let range = default_port_range();
        assert!(range.min() < range.max());
    }
}
