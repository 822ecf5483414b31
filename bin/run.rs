use sio::{Compiler, Config, Node, ParseError};

use std::fmt;
use std::process;
use std::str::FromStr;
use std::time::Duration;

use clap::{App, Arg, ArgMatches};
use slog::{o, Drain, Logger};
use slog_term::{FullFormat, TermDecorator};

enum Error {
    Parse(ParseError),
    IO(std::io::Error),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::IO(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Error {
        Error::Parse(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Parse(err) => write!(f, "parse error {}", err),
            Error::IO(err) => write!(f, "IO error: {}", err),
        }
    }
}

fn parse_arguments() -> ArgMatches<'static> {
    App::new("siorun")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Mitja Karhusaari <mitja@karhusaari.me>")
        .about("Utility for running SIO nodes")
        .arg(Arg::with_name("source")
             .help("Files containing node source code, one node per file")
             .value_name("SOURCE")
             .required(true)
             .multiple(true)
             .index(1))
        .arg(Arg::with_name("verbose")
             .help("Log node activity to the terminal")
             .long("verbose")
             .short("v"))
        .arg(Arg::with_name("timeout")
             .help("Seconds an XBus operation waits for its partner")
             .long("timeout")
             .short("t")
             .value_name("SECONDS")
             .takes_value(true))
        .arg(Arg::with_name("clock")
             .help("Initial clock speed of every node, -1 to disable pacing")
             .long("clock")
             .short("c")
             .value_name("HZ")
             .takes_value(true)
             .allow_hyphen_values(true))
        .get_matches()
}

fn numeric_argument<T: FromStr>(args: &ArgMatches, name: &str) -> Option<T> {
    let raw = args.value_of(name)?;

    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            eprintln!("invalid value for --{}: '{}'", name, raw);
            process::exit(2);
        },
    }
}

fn main() {
    let args = parse_arguments();

    let mut config = Config::default();

    if let Some(seconds) = numeric_argument(&args, "timeout") {
        config = config.with_xbus_timeout(Duration::from_secs(seconds));
    }

    if let Some(speed) = numeric_argument(&args, "clock") {
        config = config.with_clock_speed(speed);
    }

    let mut compiler = Compiler::with_config(config);

    if args.is_present("verbose") {
        let decorator = TermDecorator::new().build();
        let drain = FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        compiler = compiler.with_logger(Logger::root(drain, o!()));
    }

    let mut nodes = Vec::new();

    for path in args.values_of("source").into_iter().flatten() {
        match load(&compiler, path) {
            Ok(node) => nodes.push((path, node)),
            Err(err) => {
                eprintln!("{}: {}", path, err);
                process::exit(1);
            },
        }
    }

    let handles: Vec<_> = nodes.iter()
        .map(|(path, node)| (path, node.start()))
        .collect();

    let mut faulted = false;

    for (path, handle) in handles {
        if let Err(fault) = handle.join() {
            eprintln!("{}: {}", path, fault);
            faulted = true;
        }
    }

    if faulted {
        process::exit(1);
    }
}

fn load(compiler: &Compiler, file_path: &str) -> Result<Node, Error> {
    let source = std::fs::read_to_string(file_path)?;
    let node = compiler.compile(&source)?;

    Ok(node)
}
