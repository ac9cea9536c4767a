#![cfg(target_family = "unix")]

use fusillade::{errors::Error, pipeline::PipelineBuilder};
use std::{fs, path::PathBuf};

fn temp_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("fusillade_{}_{}", label, nanoid::nanoid!(8)))
}

#[test]
fn pipeline_is_a_transparent_relay_under_noop_stages() -> anyhow::Result<()> {
    let artifact = temp_path("relay.out");
    let stages = vec![
        r#"sh -c 'printf "hello\nworld\n"'"#.to_string(),
        "cat".to_string(),
        "cat".to_string(),
    ];

    let result = PipelineBuilder::new(&stages, "unused", &artifact).run()?;

    assert_eq!(result, artifact);
    assert_eq!(fs::read_to_string(&artifact)?, "hello\nworld\n");

    fs::remove_file(&artifact)?;
    Ok(())
}

#[test]
fn stage_commands_substitute_the_trace_placeholder() -> anyhow::Result<()> {
    let trace = temp_path("trace.data");
    let artifact = temp_path("trace.out");
    fs::write(&trace, "raw samples\n")?;

    let stages = vec!["cat {trace}".to_string(), "cat".to_string()];
    let trace_str = trace.to_string_lossy().to_string();
    PipelineBuilder::new(&stages, &trace_str, &artifact).run()?;

    assert_eq!(fs::read_to_string(&artifact)?, "raw samples\n");

    fs::remove_file(&trace)?;
    fs::remove_file(&artifact)?;
    Ok(())
}

#[test]
fn failing_stage_is_named_and_no_artifact_survives() {
    let artifact = temp_path("failing.out");
    let stages = vec![
        r#"sh -c 'printf data'"#.to_string(),
        r#"sh -c 'exit 1'"#.to_string(),
        "cat".to_string(),
    ];

    let res = PipelineBuilder::new(&stages, "unused", &artifact).run();

    match res {
        Err(Error::PipelineStage { stage, code }) => {
            assert!(stage.starts_with("2 "), "expected stage 2, got {}", stage);
            assert_eq!(code, 1);
        }
        other => panic!("expected a PipelineStage error, got {:?}", other),
    }

    // no partial artifact is left behind
    assert!(!artifact.exists());
}

#[test]
fn unspawnable_stage_fails_the_pipeline() {
    let artifact = temp_path("unspawnable.out");
    let stages = vec![
        r#"sh -c 'printf data'"#.to_string(),
        "definitely-not-a-real-binary-1c4b".to_string(),
    ];

    let res = PipelineBuilder::new(&stages, "unused", &artifact).run();

    assert!(matches!(res, Err(Error::Spawn { .. })));
    assert!(!artifact.exists());
}

#[test]
fn empty_pipeline_is_rejected() {
    let artifact = temp_path("empty.out");
    let res = PipelineBuilder::new(&[], "unused", &artifact).run();

    assert!(matches!(res, Err(Error::Config(_))));
}
