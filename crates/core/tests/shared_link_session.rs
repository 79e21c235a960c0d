//! End-to-end: start from a share string, load fixtures from disk, drive
//! the viewer through every transition and check what a user would see.

use std::path::PathBuf;

use ratioflame_core::model::NodeId;
use ratioflame_core::parsers::CounterJsonError;
use ratioflame_core::source::{DirSource, MemorySource, ProfileSource};
use ratioflame_core::state::{MemoryLink, ShareTarget, deserialize};
use ratioflame_core::svg::render_svg;
use ratioflame_core::viewer::LoadError;
use ratioflame_core::{Recompute, Transition, ViewState, Viewer, ViewerConfig};
use ratioflame_protocol::{RenderCommand, Viewport};

fn fixtures() -> DirSource {
    DirSource::new(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures"))
}

fn viewer_with_defaults() -> Viewer {
    let mut config = ViewerConfig::default();
    config.defaults = ViewState {
        file_key: "ld2".into(),
        metric_key: "cpu-cycles".into(),
        threshold: 0.25,
    };
    Viewer::new(config)
}

fn node_named(viewer: &Viewer, name: &str) -> NodeId {
    viewer
        .tree()
        .and_then(|t| t.iter().find(|(_, n)| n.name.as_str() == name).map(|(id, _)| id))
        .unwrap_or(NodeId(usize::MAX))
}

#[test]
fn lists_fixture_files() {
    assert_eq!(fixtures().keys().unwrap(), vec!["ld2", "scenario"]);
}

#[test]
fn partial_link_is_completed_on_load() {
    let mut viewer = viewer_with_defaults();
    let mut link = MemoryLink::new("#metric=instructions");

    let shared = link.current();
    viewer
        .run(Transition::LoadFromSharedState(shared), &fixtures(), &mut link)
        .unwrap();

    assert_eq!(viewer.state().file_key, "ld2");
    assert_eq!(viewer.state().metric_key, "instructions");
    assert_eq!(viewer.state().threshold, 0.25);
    assert_eq!(
        link.current(),
        "#profile=ld2&metric=instructions&threshold=0.25"
    );
}

#[test]
fn scenario_tree_colors_child_neutral() {
    let mut viewer = viewer_with_defaults();
    let mut link = MemoryLink::new("#profile=scenario&metric=cpu-cycles&threshold=0");
    let shared = link.current();
    viewer
        .run(Transition::LoadFromSharedState(shared), &fixtures(), &mut link)
        .unwrap();

    let root = node_named(&viewer, "root");
    let child = node_named(&viewer, "child");
    let derived = viewer.derived().unwrap();
    assert_eq!(derived.annotations.get(root).unwrap().ratio, 2.0);
    assert_eq!(derived.annotations.get(child).unwrap().ratio, f64::INFINITY);

    let neutral = viewer.config().palette.not_applicable;
    for threshold in [0.0, 1.0, 2.0, 50.0] {
        viewer.apply(Transition::SetThreshold(threshold), &mut link);
        assert_eq!(viewer.color_of(child), Some(neutral));
    }
}

#[test]
fn calibration_drives_slider_and_domain() {
    let mut viewer = viewer_with_defaults();
    let mut link = MemoryLink::new("");
    viewer
        .run(Transition::LoadFromSharedState(String::new()), &fixtures(), &mut link)
        .unwrap();

    // cpu-cycles / instructions; [kernel] divides by zero.
    let summary = viewer.summary().unwrap();
    assert_eq!(summary.finite_count, 7);
    assert_eq!(summary.max_finite_ratio, 4.0);
    assert!(summary.p98_ratio <= summary.max_finite_ratio);
    assert!(summary.p98_ratio > 2.0);

    let slider = viewer.slider().unwrap();
    assert_eq!(slider.max, (summary.p98_ratio * 1.5).ceil());
    assert_eq!(slider.step, slider.max / 200.0);
}

#[test]
fn switching_metric_and_file_updates_link() {
    let source = fixtures();
    let mut viewer = viewer_with_defaults();
    let mut link = MemoryLink::new("");
    viewer
        .run(Transition::LoadFromSharedState(String::new()), &source, &mut link)
        .unwrap();

    let rec = viewer
        .run(Transition::SelectMetric("cache-misses".into()), &source, &mut link)
        .unwrap();
    assert_eq!(rec, Recompute::Rederive);
    assert_eq!(viewer.metrics(), vec!["cache-misses", "cpu-cycles", "instructions"]);
    // [kernel] has no cache-misses counter.
    let kernel = node_named(&viewer, "[kernel]");
    assert!(viewer.derived().unwrap().annotations.get(kernel).unwrap().ratio.is_nan());

    viewer
        .run(Transition::SelectFile("scenario".into()), &source, &mut link)
        .unwrap();
    assert_eq!(viewer.loaded_file(), Some("scenario"));

    let restored = deserialize(&link.current());
    assert_eq!(restored.file_key.as_deref(), Some("scenario"));
    assert_eq!(restored.metric_key.as_deref(), Some("cache-misses"));
    assert_eq!(restored.threshold, Some(0.25));
}

#[test]
fn reloading_from_link_reproduces_view() {
    let source = fixtures();
    let vp = Viewport::sized(1200.0, 400.0);

    let mut first = viewer_with_defaults();
    let mut link = MemoryLink::new("");
    first
        .run(Transition::LoadFromSharedState(String::new()), &source, &mut link)
        .unwrap();
    first.run(Transition::SelectMetric("instructions".into()), &source, &mut link).unwrap();
    first.run(Transition::SetThreshold(0.8), &source, &mut link).unwrap();
    let painted = first.paint(&vp);

    let mut second = Viewer::new(ViewerConfig::default());
    let mut second_link = MemoryLink::new(link.current());
    let shared = second_link.current();
    second
        .run(Transition::LoadFromSharedState(shared), &source, &mut second_link)
        .unwrap();

    assert_eq!(second.state(), first.state());
    assert_eq!(second.paint(&vp), painted);
    assert_eq!(second_link.current(), link.current());
}

#[test]
fn svg_export_of_painted_view() {
    let mut viewer = viewer_with_defaults();
    let mut link = MemoryLink::new("");
    viewer
        .run(Transition::LoadFromSharedState(String::new()), &fixtures(), &mut link)
        .unwrap();
    let commands = viewer.paint(&Viewport::sized(1200.0, 200.0));
    let rects = commands
        .iter()
        .filter(|c| matches!(c, RenderCommand::DrawRect { .. }))
        .count();
    // Every frame is at least 5px wide at 1200px.
    assert_eq!(rects, 8);

    let svg = render_svg(&commands, 1200.0, viewer.layout_height());
    assert!(svg.contains("<title>hash_join</title>"));
    assert!(svg.contains("[kernel]"));
}

#[test]
fn pasted_link_to_missing_file_keeps_current_view() {
    let source = fixtures();
    let mut viewer = viewer_with_defaults();
    let mut link = MemoryLink::new("");
    viewer
        .run(Transition::LoadFromSharedState(String::new()), &source, &mut link)
        .unwrap();
    let vp = Viewport::sized(1200.0, 200.0);
    let shown = viewer.paint(&vp);
    let state = viewer.state().clone();
    let shared_before = link.current();

    let pasted = "#profile=nope&metric=cache-misses&threshold=3";
    let result = viewer.run(Transition::LoadFromSharedState(pasted.into()), &source, &mut link);
    assert!(result.is_err());

    assert_eq!(viewer.state(), &state);
    assert_eq!(link.current(), shared_before);
    assert_eq!(viewer.paint(&vp), shown);

    // The same link naming a file that exists is adopted whole.
    let pasted = "#profile=scenario&metric=instructions&threshold=3";
    viewer
        .run(Transition::LoadFromSharedState(pasted.into()), &source, &mut link)
        .unwrap();
    assert_eq!(link.current(), "#profile=scenario&metric=instructions&threshold=3.00");
    assert_eq!(viewer.loaded_file(), Some("scenario"));
}

#[test]
fn overly_deep_profile_is_a_load_error() {
    let mut json = String::new();
    for _ in 0..100_000 {
        json.push_str(r#"{"cpu-cycles":1,"instructions":1,"children":["#);
    }
    for _ in 0..100_000 {
        json.push_str("]}");
    }
    let source = MemorySource::new()
        .with_file("ld2", std::fs::read(fixtures().root().join("ld2.json")).unwrap())
        .with_file("deep", json);

    let mut viewer = viewer_with_defaults();
    let mut link = MemoryLink::new("");
    viewer
        .run(Transition::LoadFromSharedState(String::new()), &source, &mut link)
        .unwrap();
    let before = link.current();

    let result = viewer.run(Transition::SelectFile("deep".into()), &source, &mut link);
    assert!(matches!(
        result,
        Err(LoadError::Parse { source: CounterJsonError::TooDeep { .. }, .. })
    ));
    assert_eq!(viewer.loaded_file(), Some("ld2"));
    assert_eq!(link.current(), before);
}
