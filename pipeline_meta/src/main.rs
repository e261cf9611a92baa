mod cli;
mod config;
mod fai;
mod pipeline;
mod populate;
mod process;
mod region;
mod runlib;
mod sampleset;

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

use anyhow::Context;

fn main() -> anyhow::Result<()> {
    let cfg = cli::handle_cli().with_context(|| "Error processing command line arguments")?;
    process::process_config(&cfg)
}
