//! The VRP database (§4.6).
//!
//! [`History`] holds the current snapshot, the current serial and session
//! ID, and a bounded window of deltas. Commits replace the whole state in
//! one atomic swap so that readers never observe a torn mixture of old and
//! new data (§4.6, §5) without taking a lock that would block the walker's
//! next commit.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;
use arc_swap::ArcSwap;
use log::info;
use crate::config::Config;
use crate::rtr::serial::Serial;
use super::delta::PayloadDelta;
use super::snapshot::PayloadSnapshot;


//------------ History ----------------------------------------------------------

/// A shareable handle to the VRP database.
///
/// Cloning is cheap: it shares the underlying [`ArcSwap`].
#[derive(Clone)]
pub struct History {
    state: Arc<ArcSwap<State>>,
    window: usize,
}

impl History {
    /// Creates an empty, inactive history.
    pub fn from_config(config: &Config) -> Self {
        History {
            state: Arc::new(ArcSwap::new(Arc::new(State::new()))),
            window: config.history_size,
        }
    }

    /// The current snapshot, or `None` if no cycle has committed yet.
    pub fn current(&self) -> Option<Arc<PayloadSnapshot>> {
        let state = self.state.load();
        if state.active { Some(state.snapshot.clone()) } else { None }
    }

    /// Whether at least one validation cycle has committed a snapshot.
    pub fn is_active(&self) -> bool {
        self.state.load().active
    }

    pub fn session_id(&self) -> u16 {
        self.state.load().session_id
    }

    pub fn serial(&self) -> Serial {
        self.state.load().serial
    }

    pub fn session_and_serial(&self) -> (u16, Serial) {
        let state = self.state.load();
        (state.session_id, state.serial)
    }

    /// Commits a freshly produced snapshot.
    ///
    /// Computes the diff against the current snapshot (§4.6 step 1-2); if
    /// nothing changed, does nothing and returns `false` -- this applies
    /// equally to the very first cycle: an empty report (e.g. every TAL
    /// failing to validate) must leave the database inactive rather than
    /// serving an empty snapshot at serial 0. Otherwise allocates the next
    /// serial, rotating the session and dropping all history if that
    /// serial would alias one already retained, then atomically swaps in
    /// the new state and returns `true`.
    pub fn commit(&self, snapshot: PayloadSnapshot) -> bool {
        let old = self.state.load();

        let next_serial = old.serial.add(1);
        let delta = PayloadDelta::construct(
            &old.snapshot, &snapshot, old.serial, next_serial,
        );
        let delta = match delta {
            Some(delta) => delta,
            None => return false,
        };

        if !old.active {
            let next = State {
                active: true,
                session_id: old.session_id,
                serial: next_serial,
                snapshot: Arc::new(snapshot),
                deltas: VecDeque::new(),
            };
            self.state.store(Arc::new(next));
            info!(
                "First validation cycle complete, serving {} VRPs, {} \
                 router keys at serial {}.",
                next.snapshot.vrps().len(), next.snapshot.router_keys().len(),
                next.serial,
            );
            return true
        }

        let aliases_history = old.deltas.iter().any(|d| {
            d.to_serial() == next_serial
        });
        let next = if aliases_history {
            info!("Serial number wrapped, rotating session.");
            State {
                active: true,
                session_id: old.session_id.wrapping_add(1),
                serial: Serial::from(0),
                snapshot: Arc::new(snapshot),
                deltas: VecDeque::new(),
            }
        }
        else {
            let mut deltas = old.deltas.clone();
            deltas.push_back(Arc::new(delta));
            while deltas.len() > self.window {
                deltas.pop_front();
            }
            State {
                active: true,
                session_id: old.session_id,
                serial: next_serial,
                snapshot: Arc::new(snapshot),
                deltas,
            }
        };
        info!(
            "New serial {} ({} VRPs, {} router keys).",
            next.serial, next.snapshot.vrps().len(),
            next.snapshot.router_keys().len(),
        );
        self.state.store(Arc::new(next));
        true
    }

    /// Computes the sequence of deltas that brings a client at `from` up
    /// to the current serial.
    pub fn delta_since(&self, from: Serial) -> DeltaUpdate {
        let state = self.state.load();
        if !state.active {
            return DeltaUpdate::CacheReset
        }
        if from == state.serial {
            return DeltaUpdate::UpToDate
        }
        let mut collected = Vec::new();
        let mut expect = from;
        for delta in &state.deltas {
            if delta.from_serial() != expect {
                continue
            }
            expect = delta.to_serial();
            collected.push(delta.clone());
            if expect == state.serial {
                return DeltaUpdate::Deltas(collected)
            }
        }
        DeltaUpdate::CacheReset
    }
}


//------------ State -------------------------------------------------------------

/// The atomically-swapped contents of a [`History`].
struct State {
    active: bool,
    session_id: u16,
    serial: Serial,
    snapshot: Arc<PayloadSnapshot>,
    deltas: VecDeque<Arc<PayloadDelta>>,
}

impl State {
    fn new() -> Self {
        State {
            active: false,
            session_id: seed_session_id(),
            serial: Serial::from(0),
            snapshot: Arc::new(PayloadSnapshot::empty()),
            deltas: VecDeque::new(),
        }
    }
}

/// Seeds a session ID from the current time, the way a fresh process
/// identifies itself to clients as a new session (RFC 8210 §5).
fn seed_session_id() -> u16 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as u16)
        .unwrap_or(0)
}


//------------ DeltaUpdate -------------------------------------------------------

/// The result of asking the database for an update from a given serial.
pub enum DeltaUpdate {
    /// The client's serial is already current; no data needs to be sent.
    UpToDate,

    /// The deltas that bring the client from its serial to the current one,
    /// in order.
    Deltas(Vec<Arc<PayloadDelta>>),

    /// The client's serial is too old (or the database isn't active yet);
    /// it must be sent a full snapshot via Cache Reset.
    CacheReset,
}


#[cfg(test)]
mod test {
    use std::time::Duration;
    use log::LevelFilter;
    use crate::config::{FilterPolicy, LogTarget};
    use super::*;
    use crate::payload::vrp::Vrp;
    use crate::resources::{Afi, Prefix};

    fn config() -> Config {
        Config {
            cache_dir: "/tmp/rpki-relay-test/repository".into(),
            tal_dir: "/tmp/rpki-relay-test/tals".into(),
            exceptions: None,
            strict: false,
            stale_manifest: FilterPolicy::Warn,
            verbose: LevelFilter::Warn,
            log_target: LogTarget::Stderr,
            refresh: Duration::from_secs(600),
            history_size: 10,
            validation_timeout: Duration::from_secs(300),
            rtr_listen: Vec::new(),
            rtr_client_timeout: Duration::from_secs(600),
        }
    }

    fn vrp(asn: u32) -> Vrp {
        Vrp::new(asn, Prefix::new(Afi::Ipv4, 0xC0000200, 24), 24)
    }

    #[test]
    fn first_commit_activates_with_serial_one() {
        let history = History::from_config(&config());
        assert!(!history.is_active());
        assert!(history.commit(PayloadSnapshot::new(vec![vrp(1)], Vec::new())));
        assert!(history.is_active());
        assert_eq!(history.serial(), Serial::from(1));
    }

    /// S1: a cycle that produces no VRPs at all (e.g. every TAL's pubkey
    /// check failed) must leave the database inactive -- no new serial.
    #[test]
    fn first_commit_with_empty_snapshot_stays_inactive() {
        let history = History::from_config(&config());
        let changed = history.commit(
            PayloadSnapshot::new(Vec::new(), Vec::new())
        );
        assert!(!changed);
        assert!(!history.is_active());
    }

    #[test]
    fn unchanged_snapshot_does_not_advance_serial() {
        let history = History::from_config(&config());
        history.commit(PayloadSnapshot::new(vec![vrp(1)], Vec::new()));
        let changed = history.commit(
            PayloadSnapshot::new(vec![vrp(1)], Vec::new())
        );
        assert!(!changed);
        assert_eq!(history.serial(), Serial::from(1));
    }

    #[test]
    fn changed_snapshot_advances_serial_and_records_delta() {
        let history = History::from_config(&config());
        history.commit(PayloadSnapshot::new(vec![vrp(1)], Vec::new()));
        history.commit(PayloadSnapshot::new(vec![vrp(1), vrp(2)], Vec::new()));
        assert_eq!(history.serial(), Serial::from(2));
        match history.delta_since(Serial::from(1)) {
            DeltaUpdate::Deltas(deltas) => {
                assert_eq!(deltas.len(), 1);
                assert_eq!(deltas[0].added_vrps(), &[vrp(2)]);
            }
            _ => panic!("expected a delta"),
        }
    }

    #[test]
    fn serial_older_than_retained_history_resets() {
        let history = History::from_config(&config());
        history.commit(PayloadSnapshot::new(vec![vrp(1)], Vec::new()));
        match history.delta_since(Serial::from(9999)) {
            DeltaUpdate::CacheReset => {}
            _ => panic!("expected a cache reset"),
        }
    }
}
