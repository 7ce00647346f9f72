use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use crate::types::PortPair;
use crate::{Error, Result, env};

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub const DEFAULT_WEB: Self = Self {
        start: 8000,
        end: 8999,
    };
    pub const DEFAULT_SSH: Self = Self {
        start: 2200,
        end: 2999,
    };

    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidPorts(format!(
                "range start {start} is above end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn overlaps_with(&self, other: &PortRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn size(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }
}

impl FromStr for PortRange {
    type Err = Error;

    /// `START-END`, e.g. `8000-8999`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidPorts(format!("expected START-END, got {s:?}"));
        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        let start = start.trim().parse().map_err(|_| invalid())?;
        let end = end.trim().parse().map_err(|_| invalid())?;
        Self::new(start, end)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Web,
    Ssh,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Web => "web",
            Self::Ssh => "ssh",
        })
    }
}

/// Next candidate in each range. `u32` so the cursor can step past 65535.
#[derive(Debug)]
struct Cursors {
    web: u32,
    ssh: u32,
}

/// Hands out forwarding ports from two disjoint ranges.
///
/// Allocation is monotonic: a port is never handed out twice in the
/// lifetime of one allocator, and there is no wraparound. All cursor
/// movement happens under one mutex, so concurrent pipelines never
/// observe the same port.
#[derive(Debug)]
pub struct PortAllocator {
    web: PortRange,
    ssh: PortRange,
    cursors: Mutex<Cursors>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self {
            web: PortRange::DEFAULT_WEB,
            ssh: PortRange::DEFAULT_SSH,
            cursors: Mutex::new(Cursors {
                web: PortRange::DEFAULT_WEB.start.into(),
                ssh: PortRange::DEFAULT_SSH.start.into(),
            }),
        }
    }
}

impl PortAllocator {
    pub fn new(web: PortRange, ssh: PortRange) -> Result<Self> {
        if web.overlaps_with(&ssh) {
            return Err(Error::InvalidPorts(format!(
                "web range {web} overlaps ssh range {ssh}"
            )));
        }
        Ok(Self {
            web,
            ssh,
            cursors: Mutex::new(Cursors {
                web: web.start.into(),
                ssh: ssh.start.into(),
            }),
        })
    }

    /// Create from env vars:
    ///
    /// - `WEB_PORT_RANGE` (default: `"8000-8999"`)
    /// - `SSH_PORT_RANGE` (default: `"2200-2999"`)
    pub fn from_env() -> Result<Self> {
        let web = env::parse_or("WEB_PORT_RANGE", PortRange::DEFAULT_WEB)?;
        let ssh = env::parse_or("SSH_PORT_RANGE", PortRange::DEFAULT_SSH)?;
        Self::new(web, ssh)
    }

    pub fn web_range(&self) -> PortRange {
        self.web
    }

    pub fn ssh_range(&self) -> PortRange {
        self.ssh
    }

    fn cursors(&self) -> std::sync::MutexGuard<'_, Cursors> {
        // Cursors are plain integers; a panic elsewhere cannot leave them torn.
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn allocate_web_port(&self) -> Result<u16> {
        let mut cursors = self.cursors();
        take(&mut cursors.web, self.web, PortKind::Web)
    }

    pub fn allocate_ssh_port(&self) -> Result<u16> {
        let mut cursors = self.cursors();
        take(&mut cursors.ssh, self.ssh, PortKind::Ssh)
    }

    /// Allocate one port from each range atomically. If either range is
    /// exhausted, neither cursor moves.
    pub fn allocate_pair(&self) -> Result<PortPair> {
        let mut cursors = self.cursors();
        check(cursors.web, self.web, PortKind::Web)?;
        check(cursors.ssh, self.ssh, PortKind::Ssh)?;
        let web = take(&mut cursors.web, self.web, PortKind::Web)?;
        let ssh = take(&mut cursors.ssh, self.ssh, PortKind::Ssh)?;
        Ok(PortPair { web, ssh })
    }

    /// Move the cursors beyond ports already held by existing hosts, so a
    /// restarted process never hands out a port a live host owns.
    pub fn advance_past<I>(&self, held: I)
    where
        I: IntoIterator<Item = PortPair>,
    {
        let mut cursors = self.cursors();
        for pair in held {
            if self.web.contains(pair.web) {
                cursors.web = cursors.web.max(u32::from(pair.web) + 1);
            }
            if self.ssh.contains(pair.ssh) {
                cursors.ssh = cursors.ssh.max(u32::from(pair.ssh) + 1);
            }
        }
    }

    /// Ports left in each range, `(web, ssh)`.
    pub fn remaining(&self) -> (u32, u32) {
        let cursors = self.cursors();
        (
            (u32::from(self.web.end) + 1).saturating_sub(cursors.web),
            (u32::from(self.ssh.end) + 1).saturating_sub(cursors.ssh),
        )
    }
}

fn check(cursor: u32, range: PortRange, kind: PortKind) -> Result<()> {
    if cursor > u32::from(range.end) {
        return Err(Error::PortsExhausted { kind, range });
    }
    Ok(())
}

fn take(cursor: &mut u32, range: PortRange, kind: PortKind) -> Result<u16> {
    check(*cursor, range, kind)?;
    let port = u16::try_from(*cursor).map_err(|_| Error::PortsExhausted { kind, range })?;
    *cursor += 1;
    Ok(port)
}
