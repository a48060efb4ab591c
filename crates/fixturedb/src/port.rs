//! Chooses the TCP port an instance listens on.
//!
//! With a hint the allocator is deterministic: attempt `n` yields
//! `hint + n`, wrapping inside the configured range. Without a hint it
//! samples the range at random and keeps the first port it can actually bind.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

use fixturedb_config::PortRange;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, trace};

const PORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::port");

/// Random candidates tried before giving up.
pub const MAX_RANDOM_CANDIDATES: u32 = 64;

/// Errors raised when no port can be handed out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    /// Every sampled port was busy.
    #[error("no bindable port found in {min}..={max} after {attempts} candidates")]
    Exhausted {
        /// Lower bound of the range.
        min: u16,
        /// Upper bound of the range.
        max: u16,
        /// Candidates tried.
        attempts: u32,
    },
}

/// Port selection strategy for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocator {
    range: PortRange,
    hint: Option<u16>,
}

impl PortAllocator {
    /// Builds an allocator over `range`, preferring `hint` when present.
    #[must_use]
    pub const fn new(range: PortRange, hint: Option<u16>) -> Self {
        Self { range, hint }
    }

    /// Whether the allocator walks upwards from a hint.
    #[must_use]
    pub const fn is_hinted(&self) -> bool {
        self.hint.is_some()
    }

    /// Returns the port for retry number `attempt` (zero for the first try).
    ///
    /// Hinted mode performs no bind test: a busy port is discovered by the
    /// engine failing to listen, and the caller retries with `attempt + 1`.
    pub fn allocate(&self, attempt: u32) -> Result<u16, PortError> {
        match self.hint {
            Some(hint) => Ok(self.hinted(hint, attempt)),
            None => self.random(),
        }
    }

    fn hinted(&self, hint: u16, attempt: u32) -> u16 {
        let min = u32::from(self.range.min());
        let start = u32::from(hint).clamp(min, u32::from(self.range.max())) - min;
        let offset = (start + attempt % self.range.len()) % self.range.len();
        let port = u16::try_from(min + offset).unwrap_or(self.range.min());
        debug!(
            target: PORT_TARGET,
            hint,
            attempt,
            port,
            "allocated hinted port"
        );
        port
    }

    fn random(&self) -> Result<u16, PortError> {
        let mut rng = rand::thread_rng();
        for candidate_number in 1..=MAX_RANDOM_CANDIDATES {
            let candidate = rng.gen_range(self.range.min()..=self.range.max());
            if can_bind(candidate) {
                debug!(
                    target: PORT_TARGET,
                    port = candidate,
                    candidates = candidate_number,
                    "allocated random port"
                );
                return Ok(candidate);
            }
            trace!(target: PORT_TARGET, port = candidate, "candidate port busy");
        }
        Err(PortError::Exhausted {
            min: self.range.min(),
            max: self.range.max(),
            attempts: MAX_RANDOM_CANDIDATES,
        })
    }
}

/// Whether a listener can bind `port` on the loopback interface right now.
///
/// A successful connect says nothing about whether the engine will be able to
/// listen, so the check binds. The listener is dropped before returning.
#[must_use]
pub fn can_bind(port: u16) -> bool {
    TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).is_ok()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rstest::rstest;

    use super::*;

    fn range(min: u16, max: u16) -> PortRange {
        PortRange::new(min, max).expect("range should be valid")
    }

    #[rstest]
    #[case(13306, 0, 13306)]
    #[case(13306, 1, 13307)]
    #[case(13306, 4, 13310)]
    fn hinted_ports_walk_upwards(#[case] hint: u16, #[case] attempt: u32, #[case] expected: u16) {
        let allocator = PortAllocator::new(range(13000, 14000), Some(hint));
        assert_eq!(allocator.allocate(attempt), Ok(expected));
    }

    #[test]
    fn hinted_ports_wrap_to_the_minimum() {
        let allocator = PortAllocator::new(range(100, 104), Some(103));
        let ports: Vec<u16> = (0..4)
            .map(|attempt| allocator.allocate(attempt).expect("hinted allocation"))
            .collect();
        assert_eq!(ports, vec![103, 104, 100, 101]);
    }

    #[test]
    fn hinted_ports_do_not_repeat_before_wrapping() {
        let allocator = PortAllocator::new(range(2000, 2049), Some(2010));
        let ports: HashSet<u16> = (0..50)
            .map(|attempt| allocator.allocate(attempt).expect("hinted allocation"))
            .collect();
        assert_eq!(ports.len(), 50);
        assert!(ports.iter().all(|port| (2000..=2049).contains(port)));
    }

    #[rstest]
    #[case(50, 100)]
    #[case(9000, 200)]
    fn hints_outside_the_range_are_clamped(#[case] hint: u16, #[case] expected: u16) {
        let allocator = PortAllocator::new(range(100, 200), Some(hint));
        assert_eq!(allocator.allocate(0), Ok(expected));
    }

    #[test]
    fn random_ports_stay_in_range_and_are_bindable() {
        let allocator = PortAllocator::new(range(30000, 30999), None);
        let port = allocator.allocate(0).expect("random allocation should succeed");
        assert!((30000..=30999).contains(&port));
    }

    #[test]
    fn random_allocation_fails_loudly_when_every_port_is_busy() {
        let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
            .expect("ephemeral listener should bind");
        let busy = listener
            .local_addr()
            .expect("listener should have an address")
            .port();
        let allocator = PortAllocator::new(range(busy, busy), None);
        assert_eq!(
            allocator.allocate(0),
            Err(PortError::Exhausted {
                min: busy,
                max: busy,
                attempts: MAX_RANDOM_CANDIDATES,
            })
        );
    }
}
