//! Builder and compiler validation through the public API

mod common;

use common::builders::{IterSource, Recorder, Relay};
use stagepipe::{Direction, Pipeline, PipelineError, PipelineOptions, Stage};
use std::io::Write;

#[test]
fn test_cycle_through_relays_is_rejected() {
    let first = Relay::<i32>::new();
    let second = Relay::<i32>::new();

    let mut pipeline = Pipeline::new();
    pipeline.add(first.clone()).add(second.clone());
    pipeline.link(&first.output, &[&second.input]).unwrap();
    pipeline.link(&second.output, &[&first.input]).unwrap();

    let err = pipeline.compile(1).unwrap_err();
    assert!(matches!(err, PipelineError::Cycle { .. }));
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn test_self_link_is_rejected() {
    let relay = Relay::<i32>::new();
    let mut pipeline = Pipeline::new();
    pipeline.add(relay.clone());
    pipeline.link(&relay.output, &[&relay.input]).unwrap();

    assert!(matches!(
        pipeline.compile(1),
        Err(PipelineError::Cycle { stage }) if stage == relay.id()
    ));
}

#[test]
fn test_merge_closing_a_data_loop_is_rejected() {
    let source = IterSource::new([1i32, 2, 3]);
    let relay = Relay::<i32>::mapping(|v| v + 100);
    let recorder = Recorder::<i32>::new();

    let mut pipeline = Pipeline::new();
    pipeline
        .add(source.clone())
        .add(relay.clone())
        .add(recorder.clone());
    pipeline.link(&relay.output, &[&recorder.input]).unwrap();
    pipeline.link(&source.output, &[&relay.input]).unwrap();
    pipeline.link(&source.output, &[&recorder.input]).unwrap();

    // The relay's input now shares the buffer its own output writes into.
    assert!(matches!(
        pipeline.compile(1),
        Err(PipelineError::Cycle { .. })
    ));
}

#[test]
fn test_never_linked_output_is_named() {
    let source = IterSource::new([1i32]);
    let relay = Relay::<i32>::new();
    let mut pipeline = Pipeline::new();
    pipeline.add(source.clone()).add(relay.clone());
    pipeline.link(&source.output, &[&relay.input]).unwrap();

    match pipeline.compile(1) {
        Err(PipelineError::UnconsumedOutput { link, stage }) => {
            assert_eq!(link, relay.output.id());
            assert_eq!(stage, relay.id());
        }
        other => panic!("expected an unconsumed output, got {:?}", other.err()),
    }
}

#[test]
fn test_direction_errors() {
    let source = IterSource::new([1i32]);
    let recorder = Recorder::<i32>::new();
    let mut pipeline = Pipeline::new();
    pipeline.add(source.clone()).add(recorder.clone());

    assert!(matches!(
        pipeline.link(&recorder.input, &[&recorder.input]),
        Err(PipelineError::Direction { expected: Direction::Send, .. })
    ));
    assert!(matches!(
        pipeline.link(&source.output, &[&source.output]),
        Err(PipelineError::Direction { expected: Direction::Receive, .. })
    ));
}

#[test]
fn test_unknown_target_stage() {
    let source = IterSource::new([1i32]);
    let stranger = Recorder::<i32>::new();
    let mut pipeline = Pipeline::new();
    pipeline.add(source.clone());

    assert!(matches!(
        pipeline.link(&source.output, &[&stranger.input]),
        Err(PipelineError::UnknownLink(id)) if id == stranger.input.id()
    ));
}

#[test]
fn test_compiling_twice_fails() {
    let source = IterSource::new([1i32]);
    let recorder = Recorder::<i32>::new();
    let mut pipeline = Pipeline::new();
    pipeline.add(source.clone()).add(recorder.clone());
    pipeline.link(&source.output, &[&recorder.input]).unwrap();

    let compiled = pipeline.compile(1).unwrap();
    assert_eq!(compiled.id(), pipeline.id());
    assert!(matches!(pipeline.compile(1), Err(PipelineError::Recompile(_))));
}

#[test]
fn test_topology_dump_after_compile() {
    let source = IterSource::new([1i32]);
    let recorder = Recorder::<i32>::new();
    let mut pipeline = Pipeline::with_options(PipelineOptions::new().with_name("dump"));
    pipeline.add(source.clone()).add(recorder.clone());
    pipeline.link(&source.output, &[&recorder.input]).unwrap();

    let compiled = pipeline.compile(1).unwrap();
    let snapshot = compiled.snapshot();
    assert_eq!(snapshot.name.as_deref(), Some("dump"));
    assert_eq!(snapshot.stages[0].feeds, vec![recorder.id()]);

    let text = snapshot.to_string();
    assert!(text.contains("(dump)"));
    assert!(text.contains(&recorder.input.id().to_string()));

    let json: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
    assert_eq!(json["stages"].as_array().map(Vec::len), Some(2));
}

#[test]
fn test_options_file_drives_compile_default() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "name = \"from-file\"\nbuffer_size = 7").unwrap();
    let options = PipelineOptions::load(file.path()).unwrap();

    let source = IterSource::new([1i32]);
    let recorder = Recorder::<i32>::new();
    let mut pipeline = Pipeline::with_options(options);
    pipeline.add(source.clone()).add(recorder.clone());
    pipeline.link(&source.output, &[&recorder.input]).unwrap();

    let compiled = pipeline.compile_default().unwrap();
    assert_eq!(recorder.input.capacity(), Some(7));
    assert_eq!(compiled.options().name.as_deref(), Some("from-file"));
}
