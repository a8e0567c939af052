/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{io::Write, path::PathBuf, process::ExitCode};

use clap::{ArgAction, Parser};
use env_logger::Target;
use log::{error, Level, LevelFilter, Log, Metadata, Record};
use mail_hammer::Dispatcher;

/// Interface for sending E-Mails
#[derive(Parser)]
#[command(name = "mail-hammer", version)]
pub struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Turn on verbose mode, twice to trace the SMTP session
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Sends warnings and errors to stderr, everything else to stdout.
struct Console {
    stdout: env_logger::Logger,
    stderr: env_logger::Logger,
}

impl Console {
    fn new(verbose: u8) -> Self {
        let level = if verbose > 1 {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        let logger = |target| {
            env_logger::Builder::new()
                .filter_level(level)
                .parse_default_env()
                .target(target)
                .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
                .build()
        };

        Console {
            stdout: logger(Target::Stdout),
            stderr: logger(Target::Stderr),
        }
    }

    fn filter(&self) -> LevelFilter {
        self.stdout.filter()
    }
}

impl Log for Console {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.stdout.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if record.level() <= Level::Warn {
            self.stderr.log(record);
        } else {
            self.stdout.log(record);
        }
    }

    fn flush(&self) {
        self.stdout.flush();
        self.stderr.flush();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let console = Console::new(args.verbose);
    log::set_max_level(console.filter());
    if let Err(err) = log::set_boxed_logger(Box::new(console)) {
        eprintln!("[ERROR] Failed to install logger: {err}");
        return ExitCode::FAILURE;
    }

    let dispatcher = match Dispatcher::from_file(&args.config) {
        Ok(dispatcher) => dispatcher.verbosity(args.verbose),
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match dispatcher.run().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
