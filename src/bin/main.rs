use std::process;

use clap::Parser;
use parser::Cli;

fn main() {
    let cli = Cli::parse();
    if let Err(err) = ecoevolity_rs::run(cli) {
        eprintln!("Error: {err:?}");
        process::exit(1);
    }
}
