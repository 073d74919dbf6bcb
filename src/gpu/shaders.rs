/// WGSL sources for the three preprocessing transforms
///
/// Every transform exists twice:
/// - a compute kernel (8x8 workgroups, storage texture output)
/// - a fragment pass (full-screen triangle, render target output) for
///   devices without compute support
///
/// Both read texels with `textureLoad` at integer coordinates, so the two
/// paths produce identical results. All entry points share the
/// `KernelParams` uniform layout; the Rust mirror is `GpuKernelParams`.

/// Uniform block shared by both modules (64 bytes)
const KERNEL_PARAMS: &str = r#"
struct KernelParams {
    mean: vec4<f32>,      // alpha lane is 0
    stddev: vec4<f32>,    // alpha lane is 1
    offset: vec2<u32>,    // crop origin in the source
    size: vec2<u32>,      // crop size
    scale: f32,
}
"#;

const COMPUTE_BODY: &str = r#"
@group(0) @binding(0)
var input_texture: texture_2d<f32>;

@group(0) @binding(1)
var output_texture: texture_storage_2d<rgba32float, write>;

@group(0) @binding(2)
var<uniform> params: KernelParams;

// Partial tiles on the right/bottom edge launch extra invocations
fn outside(id: vec3<u32>) -> bool {
    let dims = textureDimensions(output_texture);
    return id.x >= dims.x || id.y >= dims.y;
}

@compute @workgroup_size(8, 8, 1)
fn cs_normalize(@builtin(global_invocation_id) id: vec3<u32>) {
    if (outside(id)) {
        return;
    }
    let texel = textureLoad(input_texture, id.xy, 0);
    let rgb = (texel.rgb - params.mean.rgb) / params.stddev.rgb * params.scale;
    textureStore(output_texture, id.xy, vec4<f32>(rgb, texel.a));
}

@compute @workgroup_size(8, 8, 1)
fn cs_crop(@builtin(global_invocation_id) id: vec3<u32>) {
    if (outside(id)) {
        return;
    }
    let last = textureDimensions(input_texture) - vec2<u32>(1u, 1u);
    let src = min(id.xy + params.offset, last);
    textureStore(output_texture, id.xy, textureLoad(input_texture, src, 0));
}

@compute @workgroup_size(8, 8, 1)
fn cs_flip(@builtin(global_invocation_id) id: vec3<u32>) {
    if (outside(id)) {
        return;
    }
    let height = textureDimensions(input_texture).y;
    let src = vec2<u32>(id.x, height - id.y - 1u);
    textureStore(output_texture, id.xy, textureLoad(input_texture, src, 0));
}
"#;

const FRAGMENT_BODY: &str = r#"
@group(0) @binding(0)
var input_texture: texture_2d<f32>;

@group(0) @binding(1)
var<uniform> params: KernelParams;

// Full-screen triangle (no vertex buffers needed)
// Vertex 0: (-1, -1), vertex 1: (3, -1), vertex 2: (-1, 3)
@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(vertex_index & 1u) * 4 - 1);
    let y = f32(i32(vertex_index >> 1u) * 4 - 1);
    return vec4<f32>(x, y, 0.0, 1.0);
}

// Fragment position is the pixel center; truncate to the texel index
fn pixel(position: vec4<f32>) -> vec2<u32> {
    return vec2<u32>(position.xy);
}

@fragment
fn fs_normalize(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let texel = textureLoad(input_texture, pixel(position), 0);
    let rgb = (texel.rgb - params.mean.rgb) / params.stddev.rgb * params.scale;
    return vec4<f32>(rgb, texel.a);
}

@fragment
fn fs_crop(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let last = textureDimensions(input_texture) - vec2<u32>(1u, 1u);
    let src = min(pixel(position) + params.offset, last);
    return textureLoad(input_texture, src, 0);
}

@fragment
fn fs_flip(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let p = pixel(position);
    let height = textureDimensions(input_texture).y;
    return textureLoad(input_texture, vec2<u32>(p.x, height - p.y - 1u), 0);
}
"#;

/// Compute module: `cs_normalize`, `cs_crop`, `cs_flip`
pub fn compute_shader() -> String {
    format!("{KERNEL_PARAMS}{COMPUTE_BODY}")
}

/// Fragment ("material") module: `vs_main`, `fs_normalize`, `fs_crop`, `fs_flip`
pub fn fragment_shader() -> String {
    format!("{KERNEL_PARAMS}{FRAGMENT_BODY}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_points_present() {
        let compute = compute_shader();
        for entry in ["fn cs_normalize", "fn cs_crop", "fn cs_flip", "@workgroup_size(8, 8, 1)"] {
            assert!(compute.contains(entry), "missing {entry}");
        }

        let fragment = fragment_shader();
        for entry in ["fn vs_main", "fn fs_normalize", "fn fs_crop", "fn fs_flip"] {
            assert!(fragment.contains(entry), "missing {entry}");
        }
    }
}
