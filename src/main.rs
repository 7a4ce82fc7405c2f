use anyhow::Result;
use clap::Parser;

use bytecontract::cli::{Cli, run};
use bytecontract::telemetry::init_logging;

fn main() -> Result<()> {
    init_logging();
    run(Cli::parse())
}
