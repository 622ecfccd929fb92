use comfy_client::WatchStrategy;
use comfy_graph::NodeId;
use comfy_runner::{cli, RunConfig, RunError, SeedPolicy, StagingStrategy};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::time::Duration;

fn parse(args: &[&str]) -> Result<RunConfig, RunError> {
    let matches = cli::command()
        .try_get_matches_from(std::iter::once("comfy-run").chain(args.iter().copied()))
        .unwrap();
    cli::resolve(&matches)
}

#[test]
fn flags_only_use_defaults_for_the_rest() {
    let config = parse(&["--api-json", "wf.json", "--prompt-file", "p.json"]).unwrap();

    assert_eq!(config.template, PathBuf::from("wf.json"));
    assert_eq!(config.server, "http://127.0.0.1:8188");
    assert_eq!(config.watch.poll_interval, Duration::from_secs(1));
    assert_eq!(config.watch.timeout, Duration::from_secs(300));
    assert_eq!(config.watch.strategy, WatchStrategy::Poll);
    assert_eq!(config.staging, StagingStrategy::Upload);
    assert_eq!(config.seed, SeedPolicy::Keep);
    assert!(!config.bypass_face_swap);
    assert_eq!(config.log_level, "info");
}

#[test]
fn cli_beats_file_beats_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("run.toml");
    std::fs::write(
        &file,
        r#"
        template = "from-file.json"
        prompt_file = "p.json"
        server = "http://gpu-box:8188"
        timeout_secs = 60
        poll_interval_secs = 0.5
        seed = 7
        server_input_dir = "/srv/comfy/input"
        "#,
    )
    .unwrap();

    let config = parse(&[
        "--config",
        file.to_str().unwrap(),
        "--timeout",
        "10",
        "--seed",
        "random",
        "--bypass-reactor",
        "--output-node",
        "203",
        "--output-node",
        "204",
        "--negative-node",
        "88",
    ])
    .unwrap();

    // file
    assert_eq!(config.template, PathBuf::from("from-file.json"));
    assert_eq!(config.server, "http://gpu-box:8188");
    assert_eq!(config.watch.poll_interval, Duration::from_millis(500));
    assert_eq!(
        config.staging,
        StagingStrategy::DirectPlacement {
            input_dir: "/srv/comfy/input".into()
        }
    );
    // cli
    assert_eq!(config.watch.timeout, Duration::from_secs(10));
    assert_eq!(config.seed, SeedPolicy::Random);
    assert!(config.bypass_face_swap);
    assert_eq!(config.output_nodes, vec![NodeId::from("203"), NodeId::from("204")]);
    assert_eq!(config.prompt_targets.negative, Some(NodeId::from("88")));
    assert_eq!(config.prompt_targets.positive, None);
    // default
    assert_eq!(config.watch.read_timeout, Duration::from_secs(60));
}

#[test]
fn cli_can_switch_back_to_upload() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("run.toml");
    std::fs::write(
        &file,
        "template = \"wf.json\"\nprompt_file = \"p.json\"\nstaging = \"direct\"\nserver_input_dir = \"/srv/in\"\n",
    )
    .unwrap();

    let config = parse(&["-c", file.to_str().unwrap(), "--staging", "upload"]).unwrap();
    assert_eq!(config.staging, StagingStrategy::Upload);
}

#[test]
fn missing_template_is_config_error() {
    let err = parse(&["--prompt-file", "p.json"]).unwrap_err();
    assert!(matches!(err, RunError::Config(_)));
}

#[test]
fn bad_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("run.toml");
    std::fs::write(&file, "timeout_secs = \"soon\"").unwrap();

    let err = parse(&["--config", file.to_str().unwrap()]).unwrap_err();
    assert!(matches!(err, RunError::Config(_)));
    assert!(err.to_string().contains("run.toml"));
}

#[test]
fn invalid_seed_is_rejected_by_parser() {
    let result = cli::command().try_get_matches_from(["comfy-run", "--seed", "lots"]);
    assert!(result.is_err());
}
