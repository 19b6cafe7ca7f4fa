//! Logging.

use std::{fs, io, process};
use std::io::Write;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::OnceLock;
use log::{LevelFilter, error};
use crate::config::{Config, LogTarget};
use crate::error::Failed;
use crate::utils::date::format_iso_date;
use crate::utils::sync::Mutex;


//------------ Logger -----------------------------------------------------------

/// Formats and writes log messages to the configured target.
pub struct Logger {
    target: Mutex<LogBackend>,
    log_level: LevelFilter,
}

enum LogBackend {
    #[cfg(unix)]
    Syslog(SyslogLogger),
    File {
        file: fs::File,
        path: PathBuf,
    },
    Stderr {
        stderr: io::Stderr,
    }
}

impl Logger {
    /// Initializes logging.
    ///
    /// All diagnostic output is done via logging, never directly to
    /// stderr. This must run before anything else that could log, so it
    /// installs a provisional stderr-only logger capped at `warn`.
    pub fn init() -> Result<(), Failed> {
        log::set_max_level(LevelFilter::Warn);
        if let Err(err) = log::set_logger(&GLOBAL_LOGGER) {
            eprintln!("Failed to initialize logger: {err}.\nAborting.");
            return Err(Failed)
        }
        Ok(())
    }

    /// Switches logging to the target named in `config`.
    pub fn switch_logging(config: &Config) -> Result<(), Failed> {
        let logger = Logger::new(config)?;
        GLOBAL_LOGGER.switch(logger);
        log::set_max_level(config.verbose);
        Ok(())
    }

    /// Re-opens the log file, if any. Used on SIGHUP for log rotation.
    pub fn rotate_log() -> Result<(), Failed> {
        GLOBAL_LOGGER.rotate()
    }

    fn new(config: &Config) -> Result<Self, Failed> {
        let target = match config.log_target {
            #[cfg(unix)]
            LogTarget::Syslog => Self::new_syslog_target()?,
            #[cfg(not(unix))]
            LogTarget::Syslog => unreachable!(),
            LogTarget::File(ref path) => Self::new_file_target(path.clone())?,
            LogTarget::Stderr => Self::new_stderr_target(),
        };
        Ok(Self { target: Mutex::new(target), log_level: config.verbose })
    }

    #[cfg(unix)]
    fn new_syslog_target() -> Result<LogBackend, Failed> {
        SyslogLogger::new().map(LogBackend::Syslog)
    }

    fn new_file_target(path: PathBuf) -> Result<LogBackend, Failed> {
        Ok(LogBackend::File {
            file: match Self::open_log_file(&path) {
                Ok(file) => file,
                Err(err) => {
                    error!(
                        "Failed to open log file '{}': {}",
                        path.display(), err
                    );
                    return Err(Failed)
                }
            },
            path,
        })
    }

    fn open_log_file(path: &PathBuf) -> Result<fs::File, io::Error> {
        fs::OpenOptions::new().create(true).append(true).open(path)
    }

    fn new_stderr_target() -> LogBackend {
        LogBackend::Stderr { stderr: io::stderr() }
    }

    fn log(&self, record: &log::Record) {
        if self.should_ignore(record) {
            return
        }
        if let Err(err) = self.try_log(record) {
            self.log_failure(err)
        }
    }

    fn try_log(&self, record: &log::Record) -> Result<(), io::Error> {
        match self.target.lock().deref_mut() {
            #[cfg(unix)]
            LogBackend::Syslog(ref mut logger) => logger.log(record),
            LogBackend::File { ref mut file, .. } => {
                writeln!(
                    file, "[{}] [{}] {}",
                    format_iso_date(chrono::Utc::now()),
                    record.level(),
                    record.args()
                )
            }
            LogBackend::Stderr { ref mut stderr } => {
                let _ = writeln!(
                    stderr, "[{}] [{}] {}",
                    format_iso_date(chrono::Utc::now()),
                    record.level(),
                    record.args()
                );
                Ok(())
            }
        }
    }

    fn log_failure(&self, err: io::Error) -> ! {
        match self.target.lock().deref() {
            #[cfg(unix)]
            LogBackend::Syslog(_) => {
                eprintln!("Logging to syslog failed: {err}. Exiting.");
            }
            LogBackend::File { ref path, .. } => {
                eprintln!(
                    "Logging to file {} failed: {}. Exiting.",
                    path.display(), err
                );
            }
            LogBackend::Stderr { .. } => {
                // Writing to stderr never fails in a way worth exiting for.
            }
        }
        process::exit(1)
    }

    fn flush(&self) {
        match self.target.lock().deref_mut() {
            #[cfg(unix)]
            LogBackend::Syslog(ref mut logger) => logger.flush(),
            LogBackend::File { ref mut file, .. } => { let _ = file.flush(); }
            LogBackend::Stderr { ref mut stderr } => {
                let _ = stderr.lock().flush();
            }
        }
    }

    /// Filters out noisy messages from dependencies we don't control.
    fn should_ignore(&self, record: &log::Record) -> bool {
        let module = match record.module_path() {
            Some(module) => module,
            None => return false,
        };
        if self.log_level >= LevelFilter::Trace {
            return false
        }
        record.level() > log::Level::Info && module.starts_with("rpki")
    }

    fn rotate(&self) -> Result<(), Failed> {
        if let LogBackend::File { ref mut file, ref path } =
            self.target.lock().deref_mut()
        {
            *file = match Self::open_log_file(path) {
                Ok(file) => file,
                Err(err) => {
                    eprintln!(
                        "Re-opening log file {} failed: {}. Exiting.",
                        path.display(), err
                    );
                    return Err(Failed)
                }
            }
        }
        Ok(())
    }
}


//------------ SyslogLogger ------------------------------------------------------

/// A syslog logger.
///
/// Essentially [`syslog::BasicLogger`], but kept behind the same mutex as
/// the other backends and surfacing errors instead of swallowing them.
#[cfg(unix)]
struct SyslogLogger(
    syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>
);

#[cfg(unix)]
impl SyslogLogger {
    fn new() -> Result<Self, Failed> {
        let process = std::env::current_exe().ok().and_then(|path|
            path.file_name()
                .and_then(std::ffi::OsStr::to_str)
                .map(ToString::to_string)
        ).unwrap_or_else(|| String::from("rpki-relay"));
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone()).or_else(|_| {
            syslog::tcp(formatter.clone(), ("127.0.0.1", 601))
        }).or_else(|_| {
            syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514))
        });
        match logger {
            Ok(logger) => Ok(Self(logger)),
            Err(err) => {
                error!("Cannot connect to syslog: {err}");
                Err(Failed)
            }
        }
    }

    fn log(&mut self, record: &log::Record) -> Result<(), io::Error> {
        match record.level() {
            log::Level::Error => self.0.err(record.args()),
            log::Level::Warn => self.0.warning(record.args()),
            log::Level::Info => self.0.info(record.args()),
            log::Level::Debug => self.0.debug(record.args()),
            log::Level::Trace => self.0.debug(record.args()),
        }.map_err(|err| {
            match err {
                syslog::Error::Io(err) => err,
                err => io::Error::other(err),
            }
        })
    }

    fn flush(&mut self) {
        let _ = self.0.backend.flush();
    }
}


//------------ GlobalLogger -------------------------------------------------------

/// The logger installed into the `log` crate's global slot.
///
/// Until a proper logger is installed via [`Logger::switch_logging`], all
/// output simply goes to stderr.
struct GlobalLogger {
    inner: OnceLock<Logger>,
}

static GLOBAL_LOGGER: GlobalLogger = GlobalLogger::new();

impl GlobalLogger {
    const fn new() -> Self {
        GlobalLogger { inner: OnceLock::new() }
    }

    fn switch(&self, logger: Logger) {
        if self.inner.set(logger).is_err() {
            panic!("Tried to switch logger more than once.")
        }
    }

    fn rotate(&self) -> Result<(), Failed> {
        match self.inner.get() {
            Some(logger) => logger.rotate(),
            None => Ok(()),
        }
    }
}

impl log::Log for GlobalLogger {
    fn enabled(&self, _: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        match self.inner.get() {
            Some(logger) => logger.log(record),
            None => {
                let _ = writeln!(
                    io::stderr().lock(), "[{}] {}",
                    record.level(), record.args()
                );
            }
        }
    }

    fn flush(&self) {
        if let Some(logger) = self.inner.get() {
            logger.flush()
        }
    }
}
