//! WGSL programs used by the deferred pipeline
//!
//! Uniform blocks here must list their members in the same order as the matching
//! `UniformDecl` slices, since the block layout is derived from declaration order.

use crate::backend::*;
use crate::render_graph::{PipelineResources, Result, ShaderProgram};
use std::borrow::Cow;

/// G-buffer shader: writes albedo, world-space normal and world-space position
pub const GBUFFER_SHADER: &str = r#"
struct GBufferUniforms {
    view_projection: mat4x4<f32>,
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    base_color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> u: GBufferUniforms;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) normal: vec3<f32>) -> VertexOutput {
    var out: VertexOutput;
    let world = u.model * vec4<f32>(position, 1.0);
    out.clip_position = u.view_projection * world;
    out.world_position = world.xyz;
    out.world_normal = (u.normal_matrix * vec4<f32>(normal, 0.0)).xyz;
    return out;
}

struct GBufferOutput {
    @location(0) albedo: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) position: vec4<f32>,
}

@fragment
fn fs_main(in: VertexOutput) -> GBufferOutput {
    var out: GBufferOutput;
    out.albedo = u.base_color;
    // w = 1 marks covered pixels
    out.normal = vec4<f32>(normalize(in.world_normal), 1.0);
    out.position = vec4<f32>(in.world_position, 1.0);
    return out;
}
"#;

pub const GBUFFER_UNIFORMS: &[UniformDecl] = &[
    UniformDecl::new("view_projection", UniformType::Mat4),
    UniformDecl::new("model", UniformType::Mat4),
    UniformDecl::new("normal_matrix", UniformType::Mat4),
    UniformDecl::new("base_color", UniformType::Vec4),
];

/// Deferred lighting shader: one directional light plus ambient, Blinn-Phong specular
pub const LIGHTING_SHADER: &str = r#"
struct LightUniforms {
    light_direction: vec3<f32>,
    light_intensity: f32,
    light_color: vec3<f32>,
    ambient: vec3<f32>,
    camera_position: vec3<f32>,
}

@group(0) @binding(0) var<uniform> u: LightUniforms;

@group(1) @binding(0) var t_albedo: texture_2d<f32>;
@group(1) @binding(1) var s_albedo: sampler;
@group(1) @binding(2) var t_normal: texture_2d<f32>;
@group(1) @binding(3) var s_normal: sampler;
@group(1) @binding(4) var t_position: texture_2d<f32>;
@group(1) @binding(5) var s_position: sampler;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(position, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = textureSample(t_albedo, s_albedo, in.uv);
    let normal = textureSample(t_normal, s_normal, in.uv);
    let position = textureSample(t_position, s_position, in.uv);

    let n = normal.xyz;
    let l = normalize(-u.light_direction);
    let radiance = u.light_color * u.light_intensity;
    let diffuse = max(dot(n, l), 0.0) * radiance;

    let v = normalize(u.camera_position - position.xyz);
    let h = normalize(l + v);
    let specular = pow(max(dot(n, h), 0.0), 32.0) * 0.25 * radiance;

    let lit = vec4<f32>(albedo.rgb * (u.ambient + diffuse) + specular, 1.0);
    return select(vec4<f32>(0.0, 0.0, 0.0, 1.0), lit, normal.w > 0.5);
}
"#;

pub const LIGHTING_UNIFORMS: &[UniformDecl] = &[
    UniformDecl::new("light_direction", UniformType::Vec3),
    UniformDecl::new("light_intensity", UniformType::Float),
    UniformDecl::new("light_color", UniformType::Vec3),
    UniformDecl::new("ambient", UniformType::Vec3),
    UniformDecl::new("camera_position", UniformType::Vec3),
];

/// Copies an HDR texture to the target with Reinhard tonemapping
pub const BLIT_SHADER: &str = r#"
@group(1) @binding(0) var t_source: texture_2d<f32>;
@group(1) @binding(1) var s_source: sampler;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(position, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let hdr = textureSample(t_source, s_source, in.uv).rgb;
    return vec4<f32>(hdr / (hdr + vec3<f32>(1.0)), 1.0);
}
"#;

/// Flat-colored overlay triangles
pub const UI_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) color: vec4<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(position, 0.0, 1.0);
    out.color = color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

pub fn gbuffer_program() -> ProgramDescriptor {
    ProgramDescriptor {
        label: Cow::Borrowed("gbuffer"),
        source: Cow::Borrowed(GBUFFER_SHADER),
        vertex_layout: MeshVertex::layout(),
        uniforms: GBUFFER_UNIFORMS.to_vec(),
        texture_units: 0,
    }
}

pub fn lighting_program() -> ProgramDescriptor {
    ProgramDescriptor {
        label: Cow::Borrowed("deferred_lighting"),
        source: Cow::Borrowed(LIGHTING_SHADER),
        vertex_layout: QuadVertex::layout(),
        uniforms: LIGHTING_UNIFORMS.to_vec(),
        texture_units: 3,
    }
}

pub fn blit_program() -> ProgramDescriptor {
    ProgramDescriptor {
        label: Cow::Borrowed("fullscreen_blit"),
        source: Cow::Borrowed(BLIT_SHADER),
        vertex_layout: QuadVertex::layout(),
        uniforms: Vec::new(),
        texture_units: 1,
    }
}

pub fn ui_program() -> ProgramDescriptor {
    ProgramDescriptor {
        label: Cow::Borrowed("ui_overlay"),
        source: Cow::Borrowed(UI_SHADER),
        vertex_layout: UiVertex::layout(),
        uniforms: Vec::new(),
        texture_units: 0,
    }
}

/// Compile `desc` once per context and cache it under `"program:<label>"`
pub fn cached_program(
    resources: &mut PipelineResources,
    desc: fn() -> ProgramDescriptor,
) -> Result<ProgramId> {
    let desc = desc();
    let key = format!("program:{}", desc.label);
    let program = resources.cache_static_resource(&key, |context| {
        Ok(ShaderProgram::new(context, &desc)?)
    })?;
    Ok(program.program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_programs_validate() {
        for desc in [gbuffer_program(), lighting_program(), blit_program(), ui_program()] {
            if let Err(e) = desc.validate() {
                panic!("{} failed to validate: {e}", desc.label);
            }
        }
    }

    #[test]
    fn test_lighting_block_layout() {
        let layout = UniformLayout::new(LIGHTING_UNIFORMS);
        assert_eq!(layout.offset_of("light_intensity", UniformType::Float).unwrap(), 12);
        assert_eq!(layout.offset_of("ambient", UniformType::Vec3).unwrap(), 32);
        assert_eq!(layout.size(), 64);
    }
}
