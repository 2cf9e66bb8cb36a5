//! Pipeline integration tests.
//!
//! Tests are parameterized using `rstest` to run against the host device and
//! wgpu. wgpu cases are skipped when the machine has no adapter.
//!
//! ```bash
//! cargo test --test pipeline_tests
//! ```

mod common;

use glam::Vec2;
use rstest::rstest;

use common::{
    create_pipeline, four_objects, frame_at, quads_at, test_config, Backend, CLEAR_TEXEL,
    QUAD_VERTICES,
};
use indirect_engine::backend::dummy::EncodedCommand;
use indirect_engine::backend::{BackendCapabilities, FrameState, GraphicsBackend};
use indirect_engine::pipeline::command_list::{AccessMode, CommandList, CommandListTable};
use indirect_engine::pipeline::compaction::COMPACTION_SHADER;
use indirect_engine::pipeline::execution::DRAW_SHADER;
use indirect_engine::pipeline::generation::{generation_shader, GENERATION_ENTRY_POINT};
use indirect_engine::pipeline::{validate_wgsl, SCENE_BINDING_SET};
use indirect_engine::{DummyBackend, FrameError, GpuDrivenPipeline, PipelineStage};

// ============================================================================
// Command Generation
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn test_culled_object_leaves_empty_slot(#[case] backend: Backend) {
    let config = test_config().with_compaction(false);
    let Some(mut pipeline) = create_pipeline(backend, config, four_objects()) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let report = pipeline.render_frame(&frame_at(0.0)).unwrap();
    assert_eq!(report.draw_range, 0..4);
    assert_eq!(report.compacted, None);

    let snapshot = pipeline.read_command_list().unwrap();
    assert_eq!(snapshot.slots.len(), 4);
    assert!(!snapshot.slots[0].is_populated());
    assert_eq!(snapshot.slots[0].args.vertex_count, 0);
    assert_eq!(snapshot.populated_indices(), vec![1, 2, 3]);

    for index in 1..4u32 {
        let args = snapshot.slots[index as usize].args;
        assert_eq!(args.first_vertex, index * QUAD_VERTICES);
        assert_eq!(args.vertex_count, QUAD_VERTICES);
        assert_eq!(args.instance_count, 1);
        assert_eq!(args.first_instance, index);
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn test_compaction_keeps_survivors_in_order(#[case] backend: Backend) {
    let Some(mut pipeline) = create_pipeline(backend, test_config(), four_objects()) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let report = pipeline.render_frame(&frame_at(0.0)).unwrap();
    assert_eq!(report.compacted, Some(0..4));

    let snapshot = pipeline.read_command_list().unwrap();
    assert_eq!(snapshot.header.count, 3);
    let instances: Vec<u32> = snapshot
        .compacted_commands()
        .iter()
        .map(|slot| slot.args.first_instance)
        .collect();
    assert_eq!(instances, vec![1, 2, 3]);
    assert!(!snapshot.slots[3].is_populated());
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn test_no_stale_commands_across_frames(#[case] backend: Backend) {
    let config = test_config().with_compaction(false);
    let Some(mut pipeline) = create_pipeline(backend, config, four_objects()) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    pipeline.render_frame(&frame_at(0.0)).unwrap();
    assert_eq!(
        pipeline.read_command_list().unwrap().populated_indices(),
        vec![1, 2, 3]
    );

    // Only the far-left object is in view after the pan.
    let report = pipeline.render_frame(&frame_at(20.0)).unwrap();
    assert_eq!(report.frame_index, 1);
    let snapshot = pipeline.read_command_list().unwrap();
    assert_eq!(snapshot.populated_indices(), vec![0]);
    assert_eq!(snapshot.slots[0].args.first_vertex, 0);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn test_mirrored_aspect_keeps_edge_objects(#[case] backend: Backend) {
    let config = test_config().with_compaction(false);
    // Mirrored clip x of the first object is -1.025 with a 0.075 clip radius
    let objects = quads_at(&[4.1, -4.1, 20.0]);
    let Some(mut pipeline) = create_pipeline(backend, config, objects) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mirrored = FrameState::new(Vec2::ZERO, Vec2::new(-1.0, 1.0));
    pipeline.render_frame(&mirrored).unwrap();
    let snapshot = pipeline.read_command_list().unwrap();
    assert_eq!(snapshot.populated_indices(), vec![0, 1]);
}

// ============================================================================
// Execution
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn test_compaction_preserves_image(#[case] backend: Backend) {
    let plain = create_pipeline(backend, test_config().with_compaction(false), four_objects());
    let compacted = create_pipeline(backend, test_config(), four_objects());
    let (Some(mut plain), Some(mut compacted)) = (plain, compacted) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    plain.render_frame(&frame_at(0.0)).unwrap();
    compacted.render_frame(&frame_at(0.0)).unwrap();

    let expected = plain.read_color_target().unwrap();
    let actual = compacted.read_color_target().unwrap();
    assert_eq!(expected, actual);
    if backend == Backend::Wgpu {
        assert!(actual.count_not(CLEAR_TEXEL) > 0);
    }
}

#[test]
fn test_compaction_encodes_fewer_commands() {
    let mut plain = GpuDrivenPipeline::new(
        DummyBackend::new(),
        test_config().with_compaction(false),
        four_objects(),
    )
    .unwrap();
    let mut compacted =
        GpuDrivenPipeline::new(DummyBackend::new(), test_config(), four_objects()).unwrap();

    plain.render_frame(&frame_at(0.0)).unwrap();
    compacted.render_frame(&frame_at(0.0)).unwrap();

    let plain_log = plain.backend().frame_log();
    let compacted_log = compacted.backend().frame_log();
    let ranges = |log: &indirect_engine::backend::FrameLog| {
        log.draws
            .iter()
            .map(|d| (d.vertices.clone(), d.instances.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(ranges(plain_log), ranges(compacted_log));
    assert_eq!(plain_log.draws.len(), 3);

    assert_eq!(plain_log.draw_command_count(), 4);
    assert_eq!(compacted_log.draw_command_count(), 1);
    assert!(compacted_log.bind_group_changes() < plain_log.bind_group_changes());
    assert!(compacted_log.encoded_command_count() < plain_log.encoded_command_count());
}

#[test]
fn test_multi_draw_fallback() {
    let backend = DummyBackend::with_capabilities(BackendCapabilities {
        multi_draw_indirect_count: false,
    });
    let mut pipeline = GpuDrivenPipeline::new(backend, test_config(), four_objects()).unwrap();
    assert!(!pipeline.multi_draw_enabled());

    let report = pipeline.render_frame(&frame_at(0.0)).unwrap();
    assert!(!report.multi_draw);

    let log = pipeline.backend().frame_log();
    assert!(!log
        .render_commands
        .iter()
        .any(|c| matches!(c, EncodedCommand::MultiDrawIndirectCount { .. })));
    let instances: Vec<u32> = log.draws.iter().map(|d| d.instances.start).collect();
    assert_eq!(instances, vec![1, 2, 3]);
    assert_eq!(log.bind_group_changes(), 1);
}

#[rstest]
#[case::multi_draw(true)]
#[case::per_slot(false)]
fn test_compacted_region_binds_once_per_binding_run(#[case] multi_draw: bool) {
    let backend = DummyBackend::with_capabilities(BackendCapabilities {
        multi_draw_indirect_count: multi_draw,
    });
    let objects = quads_at(&[-1.0, -0.5, 0.0, 0.5, 1.0]);
    let mut pipeline = GpuDrivenPipeline::new(backend, test_config(), objects).unwrap();
    pipeline.render_frame(&frame_at(0.0)).unwrap();

    let snapshot = pipeline.read_command_list().unwrap();
    let survivors = snapshot.compacted_commands();
    assert_eq!(survivors.len(), 5);
    assert!(survivors
        .iter()
        .all(|slot| slot.meta.binding_set == SCENE_BINDING_SET));
    assert!(!survivors[0].meta.inherits_bindings());
    assert!(survivors[1..].iter().all(|slot| slot.meta.inherits_bindings()));

    assert_eq!(snapshot.header.bind_count, 1);
    let log = pipeline.backend().frame_log();
    assert_eq!(log.bind_group_changes(), snapshot.header.bind_count as usize);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn test_range_splitting_compacted_region_is_rejected(#[case] backend: Backend) {
    let config = test_config().with_compaction_range(0..4);
    let Some(mut pipeline) = create_pipeline(backend, config, four_objects()) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let err = pipeline
        .render_frame_range(&frame_at(0.0), 1..4)
        .unwrap_err();
    assert!(matches!(err, FrameError::InvalidRange { .. }));
    assert_eq!(err.stage(), Some(PipelineStage::Execution));
    assert!(pipeline
        .render_frame_range(&frame_at(0.0), 0..5)
        .is_err());
    assert_eq!(pipeline.frames_rendered(), 0);

    // The pipeline stays usable.
    let report = pipeline.render_frame_range(&frame_at(0.0), 0..4).unwrap();
    assert_eq!(report.frame_index, 0);
}

#[test]
fn test_partial_range_outside_compacted_region() {
    let objects = quads_at(&[-1.0, -0.5, 0.0, 0.5, 1.0, 1.5]);
    let config = test_config().with_compaction_range(2..6);
    let mut pipeline = GpuDrivenPipeline::new(DummyBackend::new(), config, objects).unwrap();

    pipeline.render_frame_range(&frame_at(0.0), 0..2).unwrap();
    let instances: Vec<u32> = pipeline
        .backend()
        .frame_log()
        .draws
        .iter()
        .map(|d| d.instances.start)
        .collect();
    assert_eq!(instances, vec![0, 1]);

    pipeline.render_frame_range(&frame_at(0.0), 1..6).unwrap();
    assert_eq!(pipeline.backend().frame_log().draws.len(), 5);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn test_empty_scene_renders_cleared_frame(#[case] backend: Backend) {
    let Some(mut pipeline) = create_pipeline(backend, test_config(), Vec::new()) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    assert_eq!(pipeline.object_count(), 0);

    let report = pipeline.render_frame(&frame_at(0.0)).unwrap();
    assert_eq!(report.draw_range, 0..0);

    let output = pipeline.read_color_target().unwrap();
    assert_eq!(output.pixels.len(), 64 * 64 * 4);
    assert_eq!(output.count_not(CLEAR_TEXEL), 0);
    assert_eq!(output.pixel(10, 10), Some(CLEAR_TEXEL));
}

#[test]
fn test_frame_runs_stages_in_order() {
    let mut pipeline =
        GpuDrivenPipeline::new(DummyBackend::new(), test_config(), four_objects()).unwrap();
    pipeline.render_frame(&frame_at(0.0)).unwrap();

    assert_eq!(pipeline.executed_passes().len(), 3);
    let log = pipeline.backend().frame_log();
    assert_eq!(log.dispatches.len(), 2);
    assert_eq!(log.dispatches[0], [1, 1, 1]);
}

// ============================================================================
// Shaders and Access Registration
// ============================================================================

#[test]
fn test_shaders_validate() {
    for size in [1, 64, 256] {
        let shader = validate_wgsl(
            "generation",
            &generation_shader(size),
            &[(GENERATION_ENTRY_POINT, naga::ShaderStage::Compute)],
        )
        .unwrap();
        assert_eq!(
            shader.workgroup_size(GENERATION_ENTRY_POINT),
            Some([size, 1, 1])
        );
    }
    validate_wgsl(
        "compaction",
        COMPACTION_SHADER,
        &[("compact_commands", naga::ShaderStage::Compute)],
    )
    .unwrap();
    validate_wgsl(
        "draw",
        DRAW_SHADER,
        &[
            ("vs_main", naga::ShaderStage::Vertex),
            ("fs_main", naga::ShaderStage::Fragment),
        ],
    )
    .unwrap();
}

#[test]
fn test_unregistered_access_is_rejected() {
    let mut backend = DummyBackend::new();
    let layout = backend
        .create_bind_group_layout(&CommandList::binding_layout())
        .unwrap();
    let list = CommandList::create(&mut backend, "list", 4, layout).unwrap();

    let mut table = CommandListTable::new();
    let reference = table.insert(list);
    table.begin_frame(0);

    assert!(matches!(
        table.require(reference, AccessMode::Execute),
        Err(FrameError::UnregisteredAccess(_, AccessMode::Execute))
    ));
    table
        .register(reference, AccessMode::Write, PipelineStage::CommandGeneration)
        .unwrap();
    assert!(table.require(reference, AccessMode::Execute).is_err());
    assert!(table.require_mut(reference, AccessMode::Write).is_ok());

    assert!(matches!(
        table.register(reference, AccessMode::Execute, PipelineStage::Compaction),
        Err(FrameError::InvalidRegistration { .. })
    ));

    table.begin_frame(1);
    assert!(table.require_mut(reference, AccessMode::Write).is_err());
}
