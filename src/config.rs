//! Configuration.

use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use clap::{App, Arg, ArgMatches};
use dirs::home_dir;
use log::LevelFilter;
use serde::Deserialize;
use crate::error::ExitError;


//------------ Config ---------------------------------------------------------

/// Runtime configuration for the validator and RTR server.
///
/// Built from clap arguments overlaid on an optional TOML config file,
/// matching the source's `App`/`Arg` based CLI but adding the file layer
/// so options don't all have to be repeated on every invocation.
#[derive(Clone, Debug)]
pub struct Config {
    /// Path to the directory holding the locally mirrored repository.
    pub cache_dir: PathBuf,

    /// Path to the directory containing the Trust Anchor Locators.
    pub tal_dir: PathBuf,

    /// Path to the optional SLURM local-exceptions file (RFC 8416).
    pub exceptions: Option<PathBuf>,

    /// Whether parsing should reject anything even mildly irregular.
    pub strict: bool,

    /// Policy for manifests whose `nextUpdate` has passed.
    pub stale_manifest: FilterPolicy,

    /// Log level filter.
    pub verbose: LevelFilter,

    /// Where to send log output.
    pub log_target: LogTarget,

    /// Interval between validation cycles.
    pub refresh: Duration,

    /// How many past deltas to retain in the VRP database.
    pub history_size: usize,

    /// Overall deadline for a single validation cycle.
    pub validation_timeout: Duration,

    /// Addresses to listen for RTR connections on.
    pub rtr_listen: Vec<SocketAddr>,

    /// Idle timeout for an RTR client connection.
    pub rtr_client_timeout: Duration,
}

impl Config {
    /// Adds the command line arguments understood by this configuration
    /// to an existing clap `App`.
    pub fn config_args(app: App<'static, 'static>) -> App<'static, 'static> {
        app
            .arg(Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("read base configuration from this TOML file")
                .takes_value(true)
            )
            .arg(Arg::with_name("basedir")
                .short("b")
                .long("base-dir")
                .value_name("DIR")
                .help("sets the base directory for cache and TALs")
                .takes_value(true)
            )
            .arg(Arg::with_name("cachedir")
                .long("repository-dir")
                .value_name("DIR")
                .help("sets the repository mirror directory")
                .takes_value(true)
            )
            .arg(Arg::with_name("taldir")
                .short("t")
                .long("tal-dir")
                .value_name("DIR")
                .help("sets the TAL directory")
                .takes_value(true)
            )
            .arg(Arg::with_name("exceptions")
                .short("x")
                .long("exceptions")
                .value_name("FILE")
                .help("file with local exceptions (see RFC 8416 for format)")
                .takes_value(true)
            )
            .arg(Arg::with_name("strict")
                .long("strict")
                .help("parse RPKI data in strict mode")
            )
            .arg(Arg::with_name("stale")
                .long("stale")
                .value_name("POLICY")
                .possible_values(&["reject", "warn", "accept"])
                .help("how to treat manifests past their nextUpdate")
                .takes_value(true)
            )
            .arg(Arg::with_name("refresh")
                .long("refresh")
                .value_name("SECONDS")
                .help("seconds between validation cycles")
                .takes_value(true)
            )
            .arg(Arg::with_name("history")
                .long("history")
                .value_name("COUNT")
                .help("number of past deltas to keep for RTR clients")
                .takes_value(true)
            )
            .arg(Arg::with_name("listen")
                .short("l")
                .long("rtr-listen")
                .value_name("ADDR:PORT")
                .help("listen address for RTR connections")
                .takes_value(true)
                .multiple(true)
            )
            .arg(Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("print more (and more) information")
            )
            .arg(Arg::with_name("syslog")
                .long("syslog")
                .help("log to syslog instead of stderr")
            )
            .arg(Arg::with_name("logfile")
                .long("log-file")
                .value_name("FILE")
                .help("log to this file instead of stderr")
                .takes_value(true)
            )
    }

    /// Resolves the final configuration from parsed arguments.
    ///
    /// The config file, if given, provides defaults; every value it sets
    /// can be overridden by the matching command line argument.
    pub fn from_arg_matches(
        matches: &ArgMatches, cur_dir: &Path
    ) -> Result<Self, ExitError> {
        let file = match matches.value_of("config") {
            Some(path) => Some(ConfigFile::load(&cur_dir.join(path))?),
            None => None,
        };

        let base_dir = match matches.value_of("basedir") {
            Some(dir) => Some(cur_dir.join(dir)),
            None => home_dir().map(|dir| dir.join(".rpki-relay")),
        };

        let cache_dir = Self::resolve_dir(
            matches.value_of("cachedir"),
            file.as_ref().and_then(|f| f.repository_dir.as_deref()),
            base_dir.as_deref().map(|dir| dir.join("repository")),
            cur_dir,
        )?;
        let tal_dir = Self::resolve_dir(
            matches.value_of("taldir"),
            file.as_ref().and_then(|f| f.tal_dir.as_deref()),
            base_dir.as_deref().map(|dir| dir.join("tals")),
            cur_dir,
        )?;

        let exceptions = matches.value_of("exceptions")
            .map(|path| cur_dir.join(path))
            .or_else(|| {
                file.as_ref().and_then(|f| f.exceptions.as_ref())
                    .map(|path| cur_dir.join(path))
            });

        let strict = matches.is_present("strict")
            || file.as_ref().map(|f| f.strict).unwrap_or(false);

        let stale_manifest = match matches.value_of("stale") {
            Some(value) => FilterPolicy::from_str(value)?,
            None => file.as_ref()
                .and_then(|f| f.stale_manifest)
                .unwrap_or(FilterPolicy::Warn),
        };

        let verbose = match matches.occurrences_of("verbose") {
            0 => file.as_ref()
                .and_then(|f| f.log_level)
                .unwrap_or(LevelFilter::Warn),
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let log_target = if matches.is_present("syslog") {
            LogTarget::Syslog
        }
        else if let Some(path) = matches.value_of("logfile") {
            LogTarget::File(cur_dir.join(path))
        }
        else if let Some(path) = file.as_ref()
            .and_then(|f| f.log_file.as_ref())
        {
            LogTarget::File(cur_dir.join(path))
        }
        else {
            LogTarget::Stderr
        };

        let refresh = Duration::from_secs(Self::parse_u64(
            matches.value_of("refresh"),
            file.as_ref().and_then(|f| f.refresh),
            60,
            "refresh",
        )?);

        let history_size = Self::parse_usize(
            matches.value_of("history"),
            file.as_ref().and_then(|f| f.history_size),
            10,
            "history",
        )?;

        let rtr_listen = match matches.values_of("listen") {
            Some(values) => {
                let mut listen = Vec::new();
                for val in values {
                    listen.extend(Self::parse_addr(val)?);
                }
                listen
            }
            None => match file.as_ref().and_then(|f| f.rtr_listen.as_ref()) {
                Some(addrs) => {
                    let mut listen = Vec::new();
                    for val in addrs {
                        listen.extend(Self::parse_addr(val)?);
                    }
                    listen
                }
                None => "127.0.0.1:3323".to_socket_addrs().unwrap().collect(),
            }
        };

        Ok(Config {
            cache_dir,
            tal_dir,
            exceptions,
            strict,
            stale_manifest,
            verbose,
            log_target,
            refresh,
            history_size,
            validation_timeout: Duration::from_secs(300),
            rtr_listen,
            rtr_client_timeout: Duration::from_secs(600),
        })
    }

    fn resolve_dir(
        cli: Option<&str>,
        file: Option<&str>,
        default: Option<PathBuf>,
        cur_dir: &Path,
    ) -> Result<PathBuf, ExitError> {
        let dir = match cli.or(file) {
            Some(dir) => cur_dir.join(dir),
            None => match default {
                Some(dir) => dir,
                None => {
                    error!(
                        "Can't determine a default directory. \
                         Please use --base-dir."
                    );
                    return Err(ExitError::Config)
                }
            }
        };
        if let Err(err) = fs::create_dir_all(&dir) {
            error!(
                "Can't create directory {}: {}", dir.display(), err
            );
            return Err(ExitError::Config)
        }
        Ok(dir)
    }

    fn parse_addr(val: &str) -> Result<Vec<SocketAddr>, ExitError> {
        val.to_socket_addrs().map(Iterator::collect).map_err(|_| {
            error!("Invalid socket address '{}'.", val);
            ExitError::Config
        })
    }

    fn parse_u64(
        cli: Option<&str>, file: Option<u64>, default: u64, name: &str
    ) -> Result<u64, ExitError> {
        match cli {
            Some(val) => u64::from_str(val).map_err(|_| {
                error!("Invalid value '{}' for --{}.", val, name);
                ExitError::Config
            }),
            None => Ok(file.unwrap_or(default)),
        }
    }

    fn parse_usize(
        cli: Option<&str>, file: Option<usize>, default: usize, name: &str
    ) -> Result<usize, ExitError> {
        match cli {
            Some(val) => usize::from_str(val).map_err(|_| {
                error!("Invalid value '{}' for --{}.", val, name);
                ExitError::Config
            }),
            None => Ok(file.unwrap_or(default)),
        }
    }
}


//------------ ConfigFile ------------------------------------------------------

/// The subset of [`Config`] that can come from a TOML file on disk.
#[derive(Clone, Debug, Default, Deserialize)]
struct ConfigFile {
    repository_dir: Option<String>,
    tal_dir: Option<String>,
    exceptions: Option<String>,
    strict: bool,
    stale_manifest: Option<FilterPolicy>,
    #[serde(with = "level_filter_opt", default)]
    log_level: Option<LevelFilter>,
    log_file: Option<String>,
    refresh: Option<u64>,
    history_size: Option<usize>,
    rtr_listen: Option<Vec<String>>,
}

impl ConfigFile {
    fn load(path: &Path) -> Result<Self, ExitError> {
        let content = fs::read_to_string(path).map_err(|err| {
            error!(
                "Failed to read config file {}: {}", path.display(), err
            );
            ExitError::Config
        })?;
        toml::from_str(&content).map_err(|err| {
            error!(
                "Failed to parse config file {}: {}", path.display(), err
            );
            ExitError::Config
        })
    }
}

mod level_filter_opt {
    use std::str::FromStr;
    use log::LevelFilter;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(
        deserializer: D
    ) -> Result<Option<LevelFilter>, D::Error>
    where D: Deserializer<'de> {
        let value = Option::<String>::deserialize(deserializer)?;
        match value {
            Some(value) => {
                LevelFilter::from_str(&value)
                    .map(Some)
                    .map_err(serde::de::Error::custom)
            }
            None => Ok(None),
        }
    }
}


//------------ FilterPolicy ----------------------------------------------------

/// How to treat an object that failed a soft, policy-dependent check.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq
)]
#[serde(rename_all = "lowercase")]
pub enum FilterPolicy {
    /// Treat the object as invalid.
    Reject,

    /// Log a warning but accept the object anyway.
    Warn,

    /// Accept the object silently.
    Accept,
}

impl FilterPolicy {
    pub fn from_str(value: &str) -> Result<Self, ExitError> {
        match value {
            "reject" => Ok(FilterPolicy::Reject),
            "warn" => Ok(FilterPolicy::Warn),
            "accept" => Ok(FilterPolicy::Accept),
            _ => {
                error!("Invalid filter policy '{}'.", value);
                Err(ExitError::Config)
            }
        }
    }
}


//------------ LogTarget --------------------------------------------------------

/// Where log output should go.
#[derive(Clone, Debug)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
    #[cfg_attr(not(unix), allow(dead_code))]
    Syslog,
}
