/// Error types used by multiple modules.
///
/// There are two error types that are used widely within the crate.
///
/// The most important is [`Failed`]. This error indicates that an
/// operation had to be canceled for some reason and callers can assume
/// that all diagnostic information has been logged and they need not do
/// anything further.
///
/// Secondly, [`ExitError`] is used when the program should be terminated. It
/// provides enough information to determine the exit code of the program.
///
/// [`ValidationError`] is specific to the tree walker: it distinguishes
/// errors that should only invalidate the current subtree from ones that
/// abort a whole trust anchor or the process, per the error handling
/// design.

use log::error;


//------------ Failed --------------------------------------------------------

/// An operation has failed to complete.
///
/// This error types is used to indicate that an operation has failed,
/// diagnostic information has been printed or logged, and the caller can’t
/// really do anything to recover.
#[derive(Clone, Copy, Debug)]
pub struct Failed;


//------------ ExitError -----------------------------------------------------

/// An error happened that should lead to terminating the program.
#[derive(Clone, Copy, Debug)]
pub enum ExitError {
    /// Something has happened.
    ///
    /// This should be exit status 1.
    Generic,

    /// A configuration error was detected while starting up.
    ///
    /// This should be exit status 2.
    Config,
}

impl From<Failed> for ExitError {
    fn from(_: Failed) -> ExitError {
        error!("Fatal error. Exiting.");
        ExitError::Generic
    }
}

impl ExitError {
    pub fn exit_code(self) -> i32 {
        match self {
            ExitError::Generic => 1,
            ExitError::Config => 2,
        }
    }
}


//------------ ValidationError ------------------------------------------------

/// The error kinds the tree walker distinguishes.
///
/// `Transient` and `Malformed` and `PolicyViolation` are caught at subtree
/// boundaries and turned into a logged skip; `Fatal` is allowed to unwind
/// out of the validation cycle entirely.
#[derive(Clone, Copy, Debug)]
pub enum ValidationError {
    /// I/O or similar failure. The next cycle may succeed.
    Transient,

    /// The object failed to decode or its signature did not verify.
    Malformed,

    /// The object over-claimed resources or was found on a CRL.
    PolicyViolation,

    /// An invariant was broken. This should abort the process.
    Fatal,
}

impl ValidationError {
    /// Whether this error should only invalidate the subtree being
    /// processed, letting validation continue with the next sibling.
    pub fn is_subtree_local(self) -> bool {
        matches!(
            self,
            ValidationError::Malformed | ValidationError::PolicyViolation
        )
    }

    pub fn is_fatal(self) -> bool {
        matches!(self, ValidationError::Fatal)
    }
}

impl From<Failed> for ValidationError {
    fn from(_: Failed) -> Self {
        ValidationError::Transient
    }
}

