use anyhow::Result;
use clap::Parser;

mod cli;
mod config;
mod events;
mod frame;
mod hex;
mod port;
mod registry;
mod responder;
mod run;
mod scheduler;
mod session;
mod sim;
mod stats;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(args.verbose, args.quiet);

    match args.cmd {
        cli::Cmd::Serial(opts) => run::run(opts.ser.into(), opts.rules),
        cli::Cmd::Tcp(opts) => run::run(opts.tcp.into(), opts.rules),
        cli::Cmd::List(opts) => run::list(&opts.dir),
        cli::Cmd::Check(opts) => run::check(&opts.rules, opts.save),
        cli::Cmd::Sanitize(opts) => {
            let max = (opts.max > 0).then_some(opts.max);
            println!("{}", hex::sanitize_hex_input(&opts.hex, max));
            Ok(())
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
