use std::path::PathBuf;

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_parser, Arg, ArgAction,
    ArgMatches, Command,
};

use anyhow::Context;

use utils::{init_log, LogLevel};

use crate::{config::Config, pipeline::PipelineConfig, populate::MetadataPaths};

/// Set up definition of command options for clap
fn cli_model() -> Command {
    Command::new(crate_name!())
        .about(crate_description!())
        .version(crate_version!())
        .author(crate_authors!())
        .arg(
            Arg::new("timestamp")
                .short('X')
                .long("timestamp")
                .value_parser(value_parser!(stderrlog::Timestamp))
                .value_name("GRANULARITY")
                .default_value("none")
                .help("Prepend log entries with a timestamp"),
        )
        .arg(
            Arg::new("loglevel")
                .short('l')
                .long("loglevel")
                .value_name("LOGLEVEL")
                .value_parser(value_parser!(LogLevel))
                .ignore_case(true)
                .default_value("warn")
                .help("Set log level"),
        )
        .arg(
            Arg::new("quiet")
                .action(ArgAction::SetTrue)
                .long("quiet")
                .conflicts_with("loglevel")
                .help("Silence all output"),
        )
        .arg(
            Arg::new("runlib2samp")
                .short('r')
                .long("runlib2samp")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Run/library/sample table [default: metadata.runlib2samp_file from config]"),
        )
        .arg(
            Arg::new("sample_meta")
                .short('s')
                .long("sample-meta")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Sample metadata table [default: metadata.sample_meta_file from config]"),
        )
        .arg(
            Arg::new("setfile_glob")
                .short('g')
                .long("setfile-glob")
                .value_parser(value_parser!(String))
                .value_name("GLOB")
                .help("Pattern matching sample set files [default: metadata.setfile_glob from config]"),
        )
        .arg(
            Arg::new("dir")
                .short('d')
                .long("dir")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Set project directory; relative paths in the config are taken from here and sample sets are written to <PATH>/data/samplesets [default: current directory]"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Set output file for populated config (.json for JSON, otherwise YAML) [default: <stdout>]"),
        )
        .arg(
            Arg::new("config_file")
                .value_parser(value_parser!(PathBuf))
                .value_name("CONFIG_FILE")
                .required(true)
                .help("Workflow configuration file (YAML)"),
        )
}

fn metadata_paths(m: &ArgMatches) -> MetadataPaths {
    MetadataPaths {
        runlib2samp: m.get_one::<PathBuf>("runlib2samp").cloned(),
        sample_meta: m.get_one::<PathBuf>("sample_meta").cloned(),
        setfile_glob: m.get_one::<String>("setfile_glob").cloned(),
    }
}

/// Handle command line options.  Set up Config structure
pub fn handle_cli() -> anyhow::Result<Config> {
    // Get matches from command line
    let m = cli_model().get_matches();

    // Setup logging
    init_log(&m)?;

    debug!("Processing command line options");

    let config_file = m
        .get_one::<PathBuf>("config_file")
        .expect("Missing config file");

    let pipeline = PipelineConfig::from_path(config_file)
        .with_context(|| "Could not read pipeline configuration")?;

    let mut cfg = Config::new(pipeline, metadata_paths(&m));

    if let Some(p) = m.get_one::<PathBuf>("dir") {
        cfg.set_project_dir(p)
    }
    if let Some(p) = m.get_one::<PathBuf>("output") {
        cfg.set_output_file(p)
    }

    Ok(cfg)
}
