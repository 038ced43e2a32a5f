//! Session lifecycle on the log medium
//!
//! `Uninitialized → Open → Closing → (Rotated | Deleted)`, plus `Degraded`
//! when no log could be opened. A degraded manager accepts and discards
//! appends so capture, markers and tone feedback keep working without storage.
//! Idle timeout applies in both `Open` and `Degraded`, so the engine restarts
//! (and retries the medium) in either case.
//!
//! Storage faults never propagate out of this module. They are logged and
//! counted in [`SessionStats`].

use std::io::Write;

use tracing::{debug, info, warn};

use crate::medium::{LogMedium, LogStream};
use crate::smf::{self, Event, TimeBase};
use crate::{LogError, Result};

/// Fixed session parameters
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name prefix; identities are `{prefix}{index:03}.MID`
    pub file_prefix: String,
    /// Size of the identity namespace (at most 1000)
    pub capacity: u32,
    /// Minimum spacing between housekeeping passes
    pub flush_interval_ms: u32,
    /// Inactivity after which the session is closed
    pub idle_timeout_ms: u32,
    pub time_base: TimeBase,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            file_prefix: "MIDI".to_string(),
            capacity: 1000,
            flush_interval_ms: 1000,
            idle_timeout_ms: 300_000,
            time_base: TimeBase::default(),
        }
    }
}

impl SessionConfig {
    /// Storage identity for a namespace index
    pub fn identity(&self, index: u32) -> String {
        format!("{}{:03}.MID", self.file_prefix, index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Open,
    /// Running without persistence
    Degraded,
    Closing,
    /// Closed with at least one event; file left in place
    Rotated,
    /// Closed without events; file removed
    Deleted,
}

/// Outcome of one call to [`SessionManager::tick`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Housekeeping {
    /// Flush interval not reached, or nothing open
    Skipped,
    /// Buffered writes committed
    Committed,
    /// Idle timeout with events recorded; engine must restart
    Rotated { name: String },
    /// Idle timeout with nothing recorded; engine must restart
    Deleted { name: String },
    /// Idle timeout while running without persistence; engine must restart
    Retry,
}

impl Housekeeping {
    /// Whether the session was closed and a restart is required
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            Housekeeping::Rotated { .. } | Housekeeping::Deleted { .. } | Housekeeping::Retry
        )
    }
}

/// Counters for the observability collaborator
///
/// Accumulated across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub sessions_opened: u64,
    pub sessions_rotated: u64,
    pub sessions_deleted: u64,
    pub events_written: u64,
    pub bytes_written: u64,
    pub commits: u64,
    pub write_failures: u64,
    pub commit_failures: u64,
    /// Events dropped because they could not be encoded
    pub rejected_events: u64,
}

struct OpenSession {
    name: String,
    stream: Box<dyn LogStream>,
    has_received_event: bool,
}

/// Owns the single open session stream
pub struct SessionManager {
    config: SessionConfig,
    medium: Box<dyn LogMedium>,
    state: SessionState,
    open: Option<OpenSession>,
    last_housekeeping: u32,
    /// Last append, or session start; tracked even without an open log
    last_activity: u32,
    scratch: Vec<u8>,
    stats: SessionStats,
}

impl SessionManager {
    pub fn new(config: SessionConfig, medium: Box<dyn LogMedium>) -> Self {
        Self {
            config,
            medium,
            state: SessionState::Uninitialized,
            open: None,
            last_housekeeping: 0,
            last_activity: 0,
            scratch: Vec::with_capacity(64),
            stats: SessionStats::default(),
        }
    }

    /// Allocate an identity, write the preamble, and open for appending
    ///
    /// Any failure leaves the manager `Degraded` rather than returning an error.
    pub fn start(&mut self, now_ms: u32) {
        debug_assert!(self.open.is_none(), "start() with a session still open");
        self.last_housekeeping = now_ms;
        self.last_activity = now_ms;

        match self.open_session() {
            Ok(session) => {
                info!("Opened session log {}", session.name);
                self.stats.sessions_opened += 1;
                self.open = Some(session);
                self.state = SessionState::Open;
            }
            Err(e) => {
                warn!("Running without persistence: {}", e);
                self.state = SessionState::Degraded;
            }
        }
    }

    fn open_session(&mut self) -> Result<OpenSession> {
        let name = self.next_identity()?;
        let mut stream = self.medium.open_append(&name)?;

        let preamble = smf::preamble(&self.config.time_base);
        let written = stream.write_all(&preamble).and_then(|_| stream.commit());
        if let Err(e) = written {
            // Leave nothing half-written behind under this identity
            drop(stream);
            if let Err(remove_err) = self.medium.remove(&name) {
                debug!("Could not remove {} after failed preamble: {}", name, remove_err);
            }
            return Err(e.into());
        }
        self.stats.bytes_written += preamble.len() as u64;

        Ok(OpenSession {
            name,
            stream,
            has_received_event: false,
        })
    }

    /// Smallest unused index in the namespace
    fn next_identity(&self) -> Result<String> {
        for index in 0..self.config.capacity {
            let name = self.config.identity(index);
            if !self.medium.exists(&name)? {
                return Ok(name);
            }
        }
        Err(LogError::NamespaceExhausted {
            capacity: self.config.capacity,
        })
    }

    /// Encode and append one event
    ///
    /// Encoding always runs, even without an open session.
    ///
    /// # Panics
    ///
    /// Panics if the delta does not fit a four-byte variable-length quantity.
    pub fn append(&mut self, event: &Event, now_ms: u32) {
        self.scratch.clear();
        match event.encode(&mut self.scratch) {
            Ok(()) => {}
            Err(LogError::DeltaOutOfRange(delta)) => {
                panic!("tick delta {delta} exceeds the 28-bit log ceiling; session should have rotated")
            }
            Err(e) => {
                warn!("Dropping unencodable event: {}", e);
                self.stats.rejected_events += 1;
                return;
            }
        }

        self.last_activity = now_ms;
        let Some(session) = self.open.as_mut() else {
            return;
        };

        session.has_received_event = true;

        match session.stream.write_all(&self.scratch) {
            Ok(()) => {
                self.stats.events_written += 1;
                self.stats.bytes_written += self.scratch.len() as u64;
            }
            Err(e) => {
                self.stats.write_failures += 1;
                warn!(
                    "Write to {} failed ({} failures so far): {}",
                    session.name, self.stats.write_failures, e
                );
            }
        }
    }

    /// Periodic housekeeping: commit, or close on idle timeout
    ///
    /// A degraded manager has nothing to commit but still reports idle
    /// timeout as [`Housekeeping::Retry`]. That bounds the gap any delta can
    /// span, with or without storage.
    pub fn tick(&mut self, now_ms: u32) -> Housekeeping {
        if !matches!(self.state, SessionState::Open | SessionState::Degraded) {
            return Housekeeping::Skipped;
        }
        if now_ms.wrapping_sub(self.last_housekeeping) < self.config.flush_interval_ms {
            return Housekeeping::Skipped;
        }
        self.last_housekeeping = now_ms;

        let idle = now_ms.wrapping_sub(self.last_activity) >= self.config.idle_timeout_ms;
        if self.state == SessionState::Degraded {
            if idle {
                debug!("Idle while running without persistence; retrying the medium");
                return Housekeeping::Retry;
            }
            return Housekeeping::Skipped;
        }

        if idle {
            return self.close();
        }

        self.commit();
        Housekeeping::Committed
    }

    fn commit(&mut self) {
        let Some(session) = self.open.as_mut() else {
            return;
        };
        match session.stream.commit() {
            Ok(()) => self.stats.commits += 1,
            Err(e) => {
                self.stats.commit_failures += 1;
                warn!("Commit of {} failed: {}", session.name, e);
            }
        }
    }

    /// Commit and close the open session, deleting it if it stayed empty
    pub fn close(&mut self) -> Housekeeping {
        self.commit();
        let Some(session) = self.open.take() else {
            return Housekeeping::Skipped;
        };
        self.state = SessionState::Closing;

        let OpenSession {
            name,
            stream,
            has_received_event,
            ..
        } = session;
        drop(stream);

        if has_received_event {
            info!("Closed session log {}", name);
            self.stats.sessions_rotated += 1;
            self.state = SessionState::Rotated;
            Housekeeping::Rotated { name }
        } else {
            if let Err(e) = self.medium.remove(&name) {
                warn!("Could not remove empty session {}: {}", name, e);
            } else {
                debug!("Removed empty session log {}", name);
            }
            self.stats.sessions_deleted += 1;
            self.state = SessionState::Deleted;
            Housekeeping::Deleted { name }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identity of the open session
    pub fn current_name(&self) -> Option<&str> {
        self.open.as_ref().map(|s| s.name.as_str())
    }

    pub fn has_received_event(&self) -> bool {
        self.open.as_ref().is_some_and(|s| s.has_received_event)
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::DirMedium;
    use crate::smf::{ChannelMessage, LoggedEvent};
    use std::fs;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config() -> SessionConfig {
        SessionConfig {
            capacity: 5,
            flush_interval_ms: 100,
            idle_timeout_ms: 2000,
            ..Default::default()
        }
    }

    fn note(delta: u32) -> Event {
        Event::new(
            delta,
            LoggedEvent::Channel(ChannelMessage::NoteOn {
                key: 60,
                velocity: 100,
            }),
        )
    }

    #[test]
    fn test_start_writes_preamble() {
        let dir = TempDir::new().unwrap();
        let mut manager = SessionManager::new(config(), Box::new(DirMedium::new(dir.path())));
        manager.start(0);

        assert_eq!(manager.state(), SessionState::Open);
        assert_eq!(manager.current_name(), Some("MIDI000.MID"));
        let bytes = fs::read(dir.path().join("MIDI000.MID")).unwrap();
        assert_eq!(bytes, smf::preamble(&TimeBase::default()).to_vec());
    }

    #[test]
    fn test_identity_is_smallest_unused() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("MIDI000.MID"), b"x").unwrap();
        fs::write(dir.path().join("MIDI002.MID"), b"x").unwrap();

        let mut manager = SessionManager::new(config(), Box::new(DirMedium::new(dir.path())));
        manager.start(0);
        assert_eq!(manager.current_name(), Some("MIDI001.MID"));
    }

    #[test]
    fn test_namespace_exhaustion_degrades() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("MIDI{:03}.MID", i)), b"x").unwrap();
        }
        let mut manager = SessionManager::new(config(), Box::new(DirMedium::new(dir.path())));
        manager.start(0);

        assert_eq!(manager.state(), SessionState::Degraded);
        manager.append(&note(0), 10);
        assert_eq!(manager.stats().events_written, 0);
        assert_eq!(manager.tick(1000), Housekeeping::Skipped);
    }

    #[test]
    fn test_degraded_idle_requests_restart() {
        let dir = TempDir::new().unwrap();
        let medium = DirMedium::new(dir.path().join("unmounted"));
        let mut manager = SessionManager::new(config(), Box::new(medium));
        manager.start(0);
        manager.append(&note(0), 500);

        // Idle is measured from the last append, not from start
        assert_eq!(manager.tick(2400), Housekeeping::Skipped);
        let outcome = manager.tick(2500);
        assert_eq!(outcome, Housekeeping::Retry);
        assert!(outcome.requires_restart());

        // The medium shows up; the next start uses it
        fs::create_dir(dir.path().join("unmounted")).unwrap();
        manager.start(2500);
        assert_eq!(manager.state(), SessionState::Open);
        assert_eq!(manager.current_name(), Some("MIDI000.MID"));
    }

    #[test]
    fn test_missing_medium_degrades() {
        let dir = TempDir::new().unwrap();
        let medium = DirMedium::new(dir.path().join("unmounted"));
        let mut manager = SessionManager::new(config(), Box::new(medium));
        manager.start(0);
        assert_eq!(manager.state(), SessionState::Degraded);
        assert_eq!(manager.current_name(), None);
    }

    #[test]
    fn test_tick_respects_flush_interval() {
        let dir = TempDir::new().unwrap();
        let mut manager = SessionManager::new(config(), Box::new(DirMedium::new(dir.path())));
        manager.start(1000);

        assert_eq!(manager.tick(1050), Housekeeping::Skipped);
        assert_eq!(manager.tick(1100), Housekeeping::Committed);
        assert_eq!(manager.tick(1150), Housekeeping::Skipped);
        assert_eq!(manager.stats().commits, 1);
    }

    #[test]
    fn test_committed_events_reach_the_file() {
        let dir = TempDir::new().unwrap();
        let mut manager = SessionManager::new(config(), Box::new(DirMedium::new(dir.path())));
        manager.start(0);
        manager.append(&note(0), 10);
        manager.append(&note(5), 15);
        manager.tick(100);

        let bytes = fs::read(dir.path().join("MIDI000.MID")).unwrap();
        let log = smf::parse_session(&bytes).unwrap();
        assert_eq!(log.events(), vec![note(0), note(5)]);
        assert!(manager.has_received_event());
    }

    #[test]
    fn test_idle_without_events_deletes() {
        let dir = TempDir::new().unwrap();
        let mut manager = SessionManager::new(config(), Box::new(DirMedium::new(dir.path())));
        manager.start(0);

        assert_eq!(manager.tick(1900), Housekeeping::Committed);
        assert_eq!(
            manager.tick(2000),
            Housekeeping::Deleted {
                name: "MIDI000.MID".to_string()
            }
        );
        assert_eq!(manager.state(), SessionState::Deleted);
        assert!(!dir.path().join("MIDI000.MID").exists());
    }

    #[test]
    fn test_idle_after_events_rotates() {
        let dir = TempDir::new().unwrap();
        let mut manager = SessionManager::new(config(), Box::new(DirMedium::new(dir.path())));
        manager.start(0);
        manager.append(&note(0), 500);

        assert_eq!(manager.tick(2400), Housekeeping::Committed);
        let outcome = manager.tick(2500);
        assert!(outcome.requires_restart());
        assert_eq!(
            outcome,
            Housekeeping::Rotated {
                name: "MIDI000.MID".to_string()
            }
        );
        assert!(dir.path().join("MIDI000.MID").exists());

        manager.start(2500);
        assert_eq!(manager.current_name(), Some("MIDI001.MID"));
    }

    #[test]
    fn test_housekeeping_across_counter_wrap() {
        let dir = TempDir::new().unwrap();
        let mut manager = SessionManager::new(config(), Box::new(DirMedium::new(dir.path())));
        manager.start(u32::MAX - 50);
        assert_eq!(manager.tick(49), Housekeeping::Committed);
    }

    struct FlakyMedium {
        inner: DirMedium,
        failing: Arc<AtomicBool>,
    }

    struct FlakyStream {
        inner: Box<dyn LogStream>,
        failing: Arc<AtomicBool>,
    }

    impl Write for FlakyStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::Other, "card pulled"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl LogStream for FlakyStream {
        fn commit(&mut self) -> io::Result<()> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::Other, "card pulled"));
            }
            self.inner.commit()
        }
    }

    impl LogMedium for FlakyMedium {
        fn exists(&self, name: &str) -> io::Result<bool> {
            self.inner.exists(name)
        }

        fn open_append(&self, name: &str) -> io::Result<Box<dyn LogStream>> {
            Ok(Box::new(FlakyStream {
                inner: self.inner.open_append(name)?,
                failing: Arc::clone(&self.failing),
            }))
        }

        fn remove(&self, name: &str) -> io::Result<()> {
            self.inner.remove(name)
        }
    }

    #[test]
    fn test_write_failures_are_counted_not_fatal() {
        let dir = TempDir::new().unwrap();
        let failing = Arc::new(AtomicBool::new(false));
        let medium = FlakyMedium {
            inner: DirMedium::new(dir.path()),
            failing: Arc::clone(&failing),
        };
        let mut manager = SessionManager::new(config(), Box::new(medium));
        manager.start(0);

        failing.store(true, Ordering::Relaxed);
        manager.append(&note(0), 10);
        manager.append(&note(1), 11);
        assert_eq!(manager.tick(100), Housekeeping::Committed);

        let stats = manager.stats();
        assert_eq!(stats.write_failures, 2);
        assert_eq!(stats.commit_failures, 1);
        assert_eq!(manager.state(), SessionState::Open);

        // Keeps trying once the medium recovers
        failing.store(false, Ordering::Relaxed);
        manager.append(&note(2), 12);
        assert_eq!(manager.stats().events_written, 1);
    }

    #[test]
    fn test_failed_preamble_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let medium = FlakyMedium {
            inner: DirMedium::new(dir.path()),
            failing: Arc::new(AtomicBool::new(true)),
        };
        let mut manager = SessionManager::new(config(), Box::new(medium));
        manager.start(0);

        assert_eq!(manager.state(), SessionState::Degraded);
        assert!(!dir.path().join("MIDI000.MID").exists());
    }

    #[test]
    #[should_panic(expected = "28-bit")]
    fn test_oversized_delta_panics() {
        let dir = TempDir::new().unwrap();
        let mut manager = SessionManager::new(config(), Box::new(DirMedium::new(dir.path())));
        manager.start(0);
        manager.append(&note(crate::vlq::MAX_VALUE + 1), 10);
    }
}
