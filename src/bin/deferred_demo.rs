//! Renders a small scene through the deferred pipeline and prints per-frame statistics.
//!
//! ```bash
//! # Headless, three frames
//! deferred_demo --frames 3
//!
//! # On the GPU at 640x360 with a UI overlay
//! deferred_demo --backend wgpu --width 640 --height 360 --overlay
//! ```

use clap::Parser;
use frame_graph::backend::UiVertex;
use frame_graph::pipeline::UiOverlay;
use frame_graph::scene::*;
use frame_graph::{BackendType, RenderConfig, Renderer, World};
use glam::{Quat, Vec2, Vec3, Vec4};

/// Graphics backend selection for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// Validating backend without a GPU.
    #[default]
    Headless,
    /// wgpu on the default adapter.
    Wgpu,
}

impl From<CliBackend> for BackendType {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Headless => BackendType::Headless,
            CliBackend::Wgpu => BackendType::Wgpu,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "deferred_demo", about = "Render a scene through the frame graph")]
struct Args {
    /// Graphics backend to use.
    #[arg(long, value_enum, default_value_t = CliBackend::Headless)]
    backend: CliBackend,

    /// Output width in pixels.
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Output height in pixels.
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Number of frames to render.
    #[arg(long, default_value_t = 3)]
    frames: u64,

    /// Ambient light intensity.
    #[arg(long, default_value_t = 0.03)]
    ambient: f32,

    /// Draw a translucent UI panel on top.
    #[arg(long)]
    overlay: bool,
}

impl From<&Args> for RenderConfig {
    fn from(args: &Args) -> Self {
        Self {
            width: args.width,
            height: args.height,
            backend: args.backend.into(),
            ambient: Vec3::splat(args.ambient),
            ..Default::default()
        }
    }
}

fn build_world(overlay: bool) -> World {
    let mut world = World::new();
    world.insert_resource(ActiveCamera(Camera::new(
        Vec3::new(0.0, 3.0, 7.0),
        Vec3::ZERO,
    )));
    world.insert_resource(DirectionalLight::new(
        Vec3::new(-0.4, -1.0, -0.3),
        Vec3::new(1.0, 0.95, 0.9),
        2.0,
    ));

    world.spawn((
        Transform::default(),
        MeshRenderer::new("ground", plane(10.0)).with_color(Vec4::new(0.4, 0.4, 0.45, 1.0)),
    ));
    let cube = std::sync::Arc::<[_]>::from(cube(1.0));
    for (i, color) in [Vec4::new(0.8, 0.2, 0.2, 1.0), Vec4::new(0.2, 0.5, 0.9, 1.0)]
        .into_iter()
        .enumerate()
    {
        let x = i as f32 * 2.0 - 1.0;
        world.spawn((
            Transform::from_position(Vec3::new(x, 0.5, 0.0))
                .with_rotation(Quat::from_rotation_y(x * 0.4)),
            MeshRenderer::new("cube", cube.clone()).with_color(color),
        ));
    }

    if overlay {
        let panel = Vec4::new(0.0, 0.0, 0.0, 0.5);
        let corner = |x: f32, y: f32| UiVertex::new(Vec2::new(x, y), panel);
        world.insert_resource(UiOverlay {
            vertices: vec![
                corner(-0.95, -0.95),
                corner(-0.35, -0.95),
                corner(-0.35, -0.75),
                corner(-0.95, -0.95),
                corner(-0.35, -0.75),
                corner(-0.95, -0.75),
            ],
        });
    }
    world
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut renderer = match Renderer::new(RenderConfig::from(&args)) {
        Ok(renderer) => renderer,
        Err(e) => {
            log::error!("Failed to create renderer: {}", e);
            std::process::exit(1);
        }
    };
    let world = build_world(args.overlay);

    for _ in 0..args.frames {
        match renderer.render_offscreen(&world) {
            Ok(stats) => println!(
                "frame {}: {} passes [{}], allocations {}, releases {}, reuses {}",
                stats.frame_index,
                stats.passes_executed,
                stats.pass_order.join(" -> "),
                stats.cache.allocations,
                stats.cache.releases,
                stats.cache.reuses
            ),
            Err(e) => {
                log::error!("Frame {} failed: {}", renderer.frame_index() - 1, e);
                std::process::exit(1);
            }
        }
    }

    let resources = renderer.resources();
    println!(
        "cached: {} textures, {} framebuffers, {} static resources",
        resources.cached_textures(),
        resources.cached_framebuffers(),
        resources.cached_static_resources()
    );
}
