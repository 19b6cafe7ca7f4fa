#[macro_use] extern crate clap;
#[macro_use] extern crate log;

use std::env::current_dir;
use std::process::exit;
use clap::App;
use rpki_relay::{Config, ExitError, Process};

// `main` with a `Result` return insists on printing a debug message on
// error, but by the time we get here everything has already been logged,
// so we unwrap the exit code ourselves.
fn _main() -> Result<(), ExitError> {
    Process::init().map_err(ExitError::from)?;
    let cur_dir = current_dir().map_err(|err| {
        error!("Fatal: cannot get current directory ({}). Aborting.", err);
        ExitError::Config
    })?;
    let version = concat!(
        crate_version!(), " (rustc ", env!("RUSTC_VERSION"), ")"
    );
    let matches = Config::config_args(
        App::new("rpki-relay")
            .version(version)
            .author(crate_authors!())
            .about("validates RPKI repository data and serves RTR")
    ).get_matches();
    let config = Config::from_arg_matches(&matches, &cur_dir)?;
    let process = Process::new(config);
    process.run()
}

fn main() {
    match _main() {
        Ok(()) => exit(0),
        Err(err) => exit(err.exit_code()),
    }
}
