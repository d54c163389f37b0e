use clap::Parser;
use vmops::{logger, Args};

fn main() {
    let args = Args::parse();
    if let Err(error) = logger::init(args.level()) {
        eprintln!("warning: {error}");
    }
    if let Err(error) = vmops::run(&args) {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}
