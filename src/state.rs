//! Per-cycle validation state (§4.3).
//!
//! A [`ValidationState`] holds everything the tree walker needs while it
//! recurses down one trust anchor: the chain of certificates from the TA
//! down to the certificate currently being processed, their effective
//! resource sets, and whether the TA's public key has been confirmed to
//! match its TAL.
//!
//! The source threads this through a task-local slot so deeply recursive
//! walker code doesn't need to carry it explicitly. We don't do that here
//! (see the design notes on task-local storage): each walker call takes
//! its `&mut ValidationState` as a normal parameter, and the parallel
//! "stack of certs" / "stack of resource sets" from the source are fused
//! into one stack of [`CertFrame`] pairs.

use rpki::repository::cert::{Cert, ResourceCert};
use crate::error::Failed;
use crate::resources::ResourceSet;


//------------ PubKeyState ----------------------------------------------------

/// Whether a trust anchor's embedded public key has been checked against
/// its TAL yet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PubKeyState {
    Untested,
    Valid,
    Invalid,
}


//------------ CertFrame ------------------------------------------------------

/// One level of the certificate chain currently being validated.
#[derive(Clone, Debug)]
pub struct CertFrame {
    pub cert: ResourceCert,
    pub resources: ResourceSet,
}


//------------ ValidationState ------------------------------------------------

/// The state threaded through one trust anchor's validation cycle.
pub struct ValidationState {
    /// The chain of certificates from the TA (index 0) down to the one
    /// currently being processed (the top).
    chain: Vec<CertFrame>,

    /// Whether the TA's public key has been confirmed against its TAL.
    pubkey_state: PubKeyState,
}

impl ValidationState {
    /// Starts a new validation cycle for one trust anchor.
    pub fn prepare() -> Self {
        ValidationState {
            chain: Vec::new(),
            pubkey_state: PubKeyState::Untested,
        }
    }

    pub fn pubkey_state(&self) -> PubKeyState {
        self.pubkey_state
    }

    pub fn set_pubkey_state(&mut self, state: PubKeyState) {
        self.pubkey_state = state;
    }

    /// Pushes a newly validated certificate onto the chain.
    ///
    /// `is_ta` certificates with an empty resource set are rejected: an
    /// empty extension on a trust anchor is fatal (§4.1).
    pub fn push_cert(
        &mut self, cert: ResourceCert, resources: ResourceSet, is_ta: bool,
    ) -> Result<(), Failed> {
        if is_ta && resources.is_empty() {
            error!("Trust anchor certificate has an empty resource set.");
            return Err(Failed)
        }
        self.chain.push(CertFrame { cert, resources });
        Ok(())
    }

    /// Pops the top of the chain.
    ///
    /// Popping an empty chain is a bug in the walker -- every push must be
    /// matched by exactly one pop -- so this is a hard panic rather than a
    /// recoverable error.
    pub fn pop_cert(&mut self) {
        if self.chain.pop().is_none() {
            panic!("validation state: pop_cert on an empty chain");
        }
    }

    /// The certificate currently being processed, if any.
    pub fn peek_cert(&self) -> Option<&ResourceCert> {
        self.chain.last().map(|frame| &frame.cert)
    }

    /// The effective resource set of the certificate currently being
    /// processed, if any.
    pub fn peek_resources(&self) -> Option<&ResourceSet> {
        self.chain.last().map(|frame| &frame.resources)
    }

    pub fn depth(&self) -> usize {
        self.chain.len()
    }

    /// Whether `cert`'s subject key identifier already appears somewhere
    /// on the chain.
    ///
    /// The walker calls this before descending into a newly validated CA
    /// certificate: a repository that links a child back to one of its
    /// own ancestors would otherwise send the walker into an infinite
    /// recursion.
    pub fn chain_contains(&self, cert: &Cert) -> bool {
        let ski = cert.subject_key_identifier();
        self.chain.iter().any(|frame| frame.cert.subject_key_identifier() == ski)
    }

    /// Tears down the state at the end of a cycle.
    ///
    /// A non-empty chain at this point means some walker call pushed
    /// without a matching pop -- an invariant violation serious enough
    /// that we'd rather crash loudly than silently mis-validate the next
    /// certificate against the wrong parent.
    pub fn destroy(self) {
        assert!(
            self.chain.is_empty(),
            "validation state destroyed with {} certificate(s) still \
             on the chain",
            self.chain.len(),
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn destroy_accepts_empty_chain() {
        ValidationState::prepare().destroy();
    }

    #[test]
    fn fresh_state_has_no_frames() {
        let state = ValidationState::prepare();
        assert_eq!(state.depth(), 0);
        assert!(state.peek_cert().is_none());
        assert!(state.peek_resources().is_none());
        assert_eq!(state.pubkey_state(), PubKeyState::Untested);
    }
}
