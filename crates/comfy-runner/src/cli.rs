//! Command-line surface of `comfy-run`

use crate::config::{seconds, RunConfig, SeedPolicy, StagingStrategy};
use crate::error::RunError;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use comfy_client::WatchStrategy;
use comfy_graph::{NodeId, PromptTargets};
use std::path::PathBuf;

/// Build the argument parser
///
/// No flag carries a clap default: anything not given on the command line
/// falls through to the config file, then to [`RunConfig::default`].
#[must_use]
pub fn command() -> Command {
    Command::new("comfy-run")
        .version(crate::VERSION)
        .about("Submit a workflow template to a ComfyUI server and collect its outputs")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("template")
                .long("template")
                .alias("api-json")
                .value_parser(value_parser!(PathBuf))
                .help("Workflow template in API format"),
        )
        .arg(
            Arg::new("prompt-file")
                .long("prompt-file")
                .value_parser(value_parser!(PathBuf))
                .help("JSON file with positive and negative prompt"),
        )
        .arg(
            Arg::new("input-dir")
                .long("input-dir")
                .value_parser(value_parser!(PathBuf))
                .help("Directory with reference images [default: input]"),
        )
        .arg(
            Arg::new("output-dir")
                .long("output-dir")
                .value_parser(value_parser!(PathBuf))
                .help("Directory for retrieved outputs [default: output]"),
        )
        .arg(
            Arg::new("server")
                .long("server")
                .alias("host")
                .help("Server base address [default: http://127.0.0.1:8188]"),
        )
        .arg(
            Arg::new("bypass-face-swap")
                .long("bypass-face-swap")
                .alias("bypass-reactor")
                .action(ArgAction::SetTrue)
                .help("Remove the face-swap stage before submitting"),
        )
        .arg(
            Arg::new("poll-interval")
                .long("poll-interval")
                .value_parser(value_parser!(f64))
                .help("Seconds between history queries [default: 1.0]"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_parser(value_parser!(f64))
                .help("Seconds to wait for completion [default: 300]"),
        )
        .arg(
            Arg::new("read-timeout")
                .long("read-timeout")
                .value_parser(value_parser!(f64))
                .help("Longest silence on the event stream in seconds [default: 60]"),
        )
        .arg(
            Arg::new("watch")
                .long("watch")
                .value_parser(["poll", "stream"])
                .help("How to detect completion [default: poll]"),
        )
        .arg(
            Arg::new("staging")
                .long("staging")
                .value_parser(["upload", "direct"])
                .help("How input images reach the server [default: upload]"),
        )
        .arg(
            Arg::new("server-input-dir")
                .long("server-input-dir")
                .value_parser(value_parser!(PathBuf))
                .help("Server input directory for direct staging"),
        )
        .arg(
            Arg::new("output-node")
                .long("output-node")
                .action(ArgAction::Append)
                .help("Output node id hint, repeatable"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(SeedPolicy))
                .help("Seed for noise sources: a number, 'random' or 'keep' [default: keep]"),
        )
        .arg(
            Arg::new("positive-node")
                .long("positive-node")
                .help("Node id receiving the positive prompt"),
        )
        .arg(
            Arg::new("negative-node")
                .long("negative-node")
                .help("Node id receiving the negative prompt"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .help("Log filter when RUST_LOG is unset [default: info]"),
        )
}

/// Layer defaults, config file and flags into one configuration
pub fn resolve(matches: &ArgMatches) -> Result<RunConfig, RunError> {
    let mut config = RunConfig::default();
    if let Some(path) = matches.get_one::<PathBuf>("config") {
        config = config.merge_file(RunConfig::read_file(path)?)?;
    }

    if let Some(template) = matches.get_one::<PathBuf>("template") {
        config.template = template.clone();
    }
    if let Some(prompt_file) = matches.get_one::<PathBuf>("prompt-file") {
        config.prompt_file = prompt_file.clone();
    }
    if let Some(input_dir) = matches.get_one::<PathBuf>("input-dir") {
        config.input_dir = input_dir.clone();
    }
    if let Some(output_dir) = matches.get_one::<PathBuf>("output-dir") {
        config.output_dir = output_dir.clone();
    }
    if let Some(server) = matches.get_one::<String>("server") {
        config.server = server.clone();
    }
    if matches.get_flag("bypass-face-swap") {
        config.bypass_face_swap = true;
    }
    if let Some(secs) = matches.get_one::<f64>("poll-interval") {
        config.watch.poll_interval = seconds("poll-interval", *secs)?;
    }
    if let Some(secs) = matches.get_one::<f64>("timeout") {
        config.watch.timeout = seconds("timeout", *secs)?;
    }
    if let Some(secs) = matches.get_one::<f64>("read-timeout") {
        config.watch.read_timeout = seconds("read-timeout", *secs)?;
    }
    if let Some(watch) = matches.get_one::<String>("watch") {
        config.watch.strategy = watch.parse::<WatchStrategy>().map_err(RunError::Config)?;
    }
    config.staging = StagingStrategy::from_parts(
        matches.get_one::<String>("staging").map(String::as_str),
        matches.get_one::<PathBuf>("server-input-dir").cloned(),
        &config.staging,
    )?;
    if let Some(nodes) = matches.get_many::<String>("output-node") {
        config.output_nodes = nodes.map(|id| NodeId::from(id.as_str())).collect();
    }
    if let Some(seed) = matches.get_one::<SeedPolicy>("seed") {
        config.seed = *seed;
    }

    let positive = matches.get_one::<String>("positive-node").map(|id| NodeId::from(id.as_str()));
    let negative = matches.get_one::<String>("negative-node").map(|id| NodeId::from(id.as_str()));
    if positive.is_some() || negative.is_some() {
        config.prompt_targets = PromptTargets::explicit(positive, negative);
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}
