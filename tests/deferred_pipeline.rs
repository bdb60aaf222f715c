//! End-to-end tests of the standard deferred pipeline on the headless context

use frame_graph::backend::*;
use frame_graph::pipeline::*;
use frame_graph::render_graph::*;
use frame_graph::renderer::OFFSCREEN_TARGET;
use frame_graph::scene::*;
use frame_graph::{RenderConfig, Renderer, World};
use glam::{Vec2, Vec3, Vec4};
use rstest::*;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn headless_renderer(config: RenderConfig) -> (Renderer, CommandLog) {
    init_logger();
    let context = HeadlessContext::new();
    let log = context.command_log();
    (Renderer::with_context(config, Box::new(context)), log)
}

fn sized(width: u32, height: u32) -> RenderConfig {
    RenderConfig {
        width,
        height,
        ..Default::default()
    }
}

/// World with `cubes` cube entities sharing one mesh
fn cube_world(cubes: usize) -> World {
    let mut world = World::new();
    world.insert_resource(ActiveCamera(Camera::new(Vec3::new(0.0, 2.0, 6.0), Vec3::ZERO)));
    world.insert_resource(DirectionalLight::default());
    let vertices: std::sync::Arc<[MeshVertex]> = cube(1.0).into();
    for i in 0..cubes {
        world.spawn((
            Transform::from_position(Vec3::new(i as f32 * 1.5, 0.0, 0.0)),
            MeshRenderer::new("cube", vertices.clone()),
        ));
    }
    world
}

fn framebuffer_of(renderer: &Renderer, name: &str) -> FramebufferId {
    renderer
        .resources()
        .render_target_by_name(name)
        .map(|target| target.framebuffer)
        .unwrap_or_else(|| panic!("render target '{name}' was not cached"))
}

#[test]
fn test_passes_run_in_dependency_order() {
    let (mut renderer, log) = headless_renderer(sized(64, 48));
    let world = cube_world(2);

    let stats = renderer.render_offscreen(&world).unwrap();
    assert_eq!(
        stats.pass_order,
        vec![
            "scene_extract",
            "clear",
            "gbuffer",
            "deferred_lighting",
            "fullscreen_blit"
        ]
    );
    assert_eq!(stats.passes_executed, 5);

    let output = framebuffer_of(&renderer, OFFSCREEN_TARGET);
    let gbuffer = framebuffer_of(&renderer, "gbuffer");
    let lighting = framebuffer_of(&renderer, "lighting");

    let sequence: Vec<FramebufferId> = log
        .clears_and_draws()
        .into_iter()
        .map(|command| match command {
            Command::Clear { framebuffer, .. } | Command::Draw { framebuffer, .. } => framebuffer,
            other => panic!("unexpected command {other:?}"),
        })
        .collect();
    assert_eq!(
        sequence,
        vec![output, gbuffer, gbuffer, gbuffer, lighting, output]
    );

    let kinds: Vec<&'static str> = log
        .clears_and_draws()
        .iter()
        .map(|command| match command {
            Command::Clear { .. } => "clear",
            _ => "draw",
        })
        .collect();
    assert_eq!(kinds, vec!["clear", "clear", "draw", "draw", "draw", "draw"]);
}

#[test]
fn test_fullscreen_draws_use_six_vertices() {
    let (mut renderer, log) = headless_renderer(sized(32, 32));
    renderer.render_offscreen(&cube_world(1)).unwrap();

    let draws = log.draws();
    let counts: Vec<u32> = draws
        .iter()
        .map(|command| match command {
            Command::Draw { count, .. } => *count,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(counts, vec![36, 6, 6]);
}

#[test]
fn test_lighting_binds_gbuffer_units() {
    let (mut renderer, log) = headless_renderer(sized(32, 32));
    renderer.render_offscreen(&cube_world(1)).unwrap();

    let resources = renderer.resources();
    let expected: Vec<(u32, TextureId)> = ["gbuffer.albedo", "gbuffer.normal", "gbuffer.position"]
        .iter()
        .enumerate()
        .map(|(unit, name)| (unit as u32, resources.texture_by_name(name).unwrap().id))
        .collect();

    let binds: Vec<(u32, TextureId)> = log
        .filtered(|command| matches!(command, Command::BindTexture { .. }))
        .into_iter()
        .map(|command| match command {
            Command::BindTexture { unit, texture } => (unit, texture),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(&binds[..3], &expected[..]);
    // The blit rebinds unit 0 to the lighting output
    assert_eq!(
        binds[3],
        (0, resources.texture_by_name("lighting.output").unwrap().id)
    );
}

#[rstest]
#[case(2)]
#[case(5)]
fn test_later_frames_allocate_nothing(#[case] frames: u64) {
    let (mut renderer, _log) = headless_renderer(sized(64, 64));
    let world = cube_world(3);

    let first = renderer.render_offscreen(&world).unwrap();
    // 7 textures, 3 render targets, 3 programs, the quad and the cube mesh
    assert_eq!(first.cache.allocations, 15);
    assert_eq!(first.cache.releases, 0);
    let albedo = renderer.resources().texture_by_name("gbuffer.albedo").unwrap().id;
    let gbuffer = framebuffer_of(&renderer, "gbuffer");

    for frame in 1..frames {
        let stats = renderer.render_offscreen(&world).unwrap();
        assert_eq!(stats.frame_index, frame);
        assert_eq!(stats.cache.allocations, 0);
        assert_eq!(stats.cache.releases, 0);
        assert!(stats.cache.reuses > 0);
    }

    assert_eq!(renderer.resources().texture_by_name("gbuffer.albedo").unwrap().id, albedo);
    assert_eq!(framebuffer_of(&renderer, "gbuffer"), gbuffer);
    assert_eq!(renderer.frame_index(), frames);
}

#[test]
fn test_resize_reallocates_size_dependent_objects() {
    let (mut renderer, _log) = headless_renderer(sized(64, 64));
    let world = cube_world(1);
    renderer.render_offscreen(&world).unwrap();
    let old_albedo = renderer.resources().texture_by_name("gbuffer.albedo").unwrap().id;

    renderer.resize(32, 16);
    let stats = renderer.render_offscreen(&world).unwrap();
    assert_eq!(stats.cache.allocations, 10);
    assert_eq!(stats.cache.releases, 10);

    let albedo = *renderer.resources().texture_by_name("gbuffer.albedo").unwrap();
    assert_ne!(albedo.id, old_albedo);
    assert_eq!((albedo.width, albedo.height), (32, 16));
    assert_eq!(renderer.resources().cached_static_resources(), 5);
}

#[test]
fn test_empty_world_still_lights_and_blits() {
    let (mut renderer, log) = headless_renderer(sized(16, 16));
    let stats = renderer.render_offscreen(&World::new()).unwrap();

    assert_eq!(stats.passes_executed, 5);
    assert_eq!(log.draws().len(), 2);
}

#[test]
fn test_ui_overlay_is_blended_and_truncated() {
    let (mut renderer, log) = headless_renderer(RenderConfig {
        ui_vertex_capacity: 6,
        ..sized(32, 32)
    });
    let mut world = cube_world(1);
    let vertex = UiVertex::new(Vec2::ZERO, Vec4::new(1.0, 1.0, 1.0, 0.5));
    world.insert_resource(UiOverlay {
        vertices: vec![vertex; 9],
    });

    let stats = renderer.render_offscreen(&world).unwrap();
    assert_eq!(stats.pass_order.last().map(String::as_str), Some("ui_overlay"));

    let commands = log.commands();
    let blend_on = commands
        .iter()
        .position(|command| *command == Command::SetBlending(true))
        .expect("overlay enables blending");
    let last_draw = commands
        .iter()
        .rposition(|command| matches!(command, Command::Draw { .. }))
        .unwrap();
    assert!(blend_on < last_draw);
    assert!(matches!(
        commands[last_draw],
        Command::Draw { count: 6, framebuffer, .. } if framebuffer == framebuffer_of(&renderer, OFFSCREEN_TARGET)
    ));
    assert!(renderer.resources().has_static_resource(UI_OVERLAY_BUFFER_KEY));
}

#[rstest]
#[case(0)]
#[case(2)]
fn test_ui_overlay_without_room_for_a_triangle_is_skipped(#[case] capacity: u32) {
    let (mut renderer, log) = headless_renderer(RenderConfig {
        ui_vertex_capacity: capacity,
        ..sized(32, 32)
    });
    let mut world = cube_world(1);
    world.insert_resource(UiOverlay {
        vertices: vec![UiVertex::new(Vec2::ZERO, Vec4::ONE); 3],
    });

    let stats = renderer.render_offscreen(&world).unwrap();
    assert_eq!(stats.pass_order.last().map(String::as_str), Some("ui_overlay"));
    assert!(!log.commands().contains(&Command::SetBlending(true)));
    assert!(!renderer.resources().has_static_resource(UI_OVERLAY_BUFFER_KEY));
}

#[test]
fn test_gbuffer_without_scene_extract_fails() {
    init_logger();
    let world = cube_world(1);
    let mut resources = PipelineResources::new(Box::new(HeadlessContext::new()));
    let mut pipeline = RenderPipeline::new(
        PipelineContainer::new(),
        Some(ExternalTarget::new("screen", 16, 16)),
    );
    pipeline.add_pass(GBufferPass::new(&world, 16, 16)).unwrap();

    let err = pipeline.execute(0, &mut resources).unwrap_err();
    assert!(matches!(&err, RenderGraphError::PassFailed { pass, .. } if pass == "gbuffer"));
    assert!(matches!(
        err.root_cause(),
        RenderGraphError::MissingPipelineData { type_name } if type_name.ends_with("CameraData")
    ));
    assert_eq!(resources.current_frame(), None);
}

#[test]
fn test_lighting_without_gbuffer_fails_in_setup() {
    let mut pipeline = RenderPipeline::new(PipelineContainer::new(), None);
    let err = pipeline.add_pass(LightingPass::new()).unwrap_err();
    assert!(matches!(
        err,
        RenderGraphError::MissingPipelineData { type_name } if type_name.ends_with("GBufferData")
    ));
    assert_eq!(pipeline.pass_count(), 0);
}

#[test]
fn test_blit_without_output_target_fails_in_setup() {
    let mut pipeline = RenderPipeline::new(PipelineContainer::new(), None);
    pipeline
        .add_callback_pass(
            "fake_lighting",
            |builder, container| {
                let texture = builder.create_texture("hdr", 8, 8, TextureOptions::default())?;
                builder.writes(texture)?;
                container.create::<LightingOutput>()?.texture = texture;
                Ok(())
            },
            |_, _| Ok(()),
        )
        .unwrap();

    let err = pipeline.add_pass(FullscreenBlitPass::new()).unwrap_err();
    assert!(matches!(err, RenderGraphError::RenderTargetNotSet));
}

#[test]
fn test_scene_extract_publishes_camera_and_light() {
    let mut world = World::new();
    let camera = Camera::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO);
    world.insert_resource(ActiveCamera(camera.clone()));
    world.insert_resource(DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE, 4.0));

    let mut pipeline = RenderPipeline::new(PipelineContainer::new(), None);
    pipeline
        .add_pass(SceneExtractPass::new(&world, Vec3::splat(0.2)))
        .unwrap();

    let container = pipeline.container();
    let camera_data = container.get::<CameraData>().unwrap();
    assert_eq!(camera_data.position, camera.position);
    assert_eq!(camera_data.view_projection, camera.view_projection_matrix());

    let light = container.get::<LightData>().unwrap();
    assert_eq!(light.direction, Vec3::NEG_Y);
    assert_eq!(light.intensity, 4.0);
    assert_eq!(light.ambient, Vec3::splat(0.2));
}
