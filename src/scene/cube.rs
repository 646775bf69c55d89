//! Baked cube geometry and the pipeline that draws it

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use crate::backend::{
    BindingKind, PipelineDescriptor, StaticSampler, TextureFormat, VertexAttribute, VertexFormat,
};

/// Position, color and texture coordinate.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CubeVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

const_assert_eq!(std::mem::size_of::<CubeVertex>(), 32);

const fn v(position: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> CubeVertex {
    CubeVertex {
        position,
        color,
        uv,
    }
}

/// Four vertices per face so every face gets its own UVs.
///
/// Faces in order: front (+Z), right (+X), back (-Z), left (-X), top (+Y),
/// bottom (-Y). Each face lists top-left, top-right, bottom-left, bottom-right
/// as seen from outside.
pub const CUBE_VERTICES: [CubeVertex; 24] = [
    v([-0.5, 0.5, 0.5], [0.0, 1.0, 1.0], [0.0, 0.0]),
    v([0.5, 0.5, 0.5], [1.0, 1.0, 1.0], [1.0, 0.0]),
    v([-0.5, -0.5, 0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
    v([0.5, -0.5, 0.5], [1.0, 0.0, 1.0], [1.0, 1.0]),
    v([0.5, 0.5, 0.5], [1.0, 1.0, 1.0], [0.0, 0.0]),
    v([0.5, 0.5, -0.5], [1.0, 1.0, 0.0], [1.0, 0.0]),
    v([0.5, -0.5, 0.5], [1.0, 0.0, 1.0], [0.0, 1.0]),
    v([0.5, -0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 1.0]),
    v([0.5, 0.5, -0.5], [1.0, 1.0, 0.0], [0.0, 0.0]),
    v([-0.5, 0.5, -0.5], [0.0, 1.0, 0.0], [1.0, 0.0]),
    v([0.5, -0.5, -0.5], [1.0, 0.0, 0.0], [0.0, 1.0]),
    v([-0.5, -0.5, -0.5], [0.0, 0.0, 0.0], [1.0, 1.0]),
    v([-0.5, 0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
    v([-0.5, 0.5, 0.5], [0.0, 1.0, 1.0], [1.0, 0.0]),
    v([-0.5, -0.5, -0.5], [0.0, 0.0, 0.0], [0.0, 1.0]),
    v([-0.5, -0.5, 0.5], [0.0, 0.0, 1.0], [1.0, 1.0]),
    v([-0.5, 0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
    v([0.5, 0.5, -0.5], [1.0, 1.0, 0.0], [1.0, 0.0]),
    v([-0.5, 0.5, 0.5], [0.0, 1.0, 1.0], [0.0, 1.0]),
    v([0.5, 0.5, 0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
    v([-0.5, -0.5, 0.5], [0.0, 0.0, 1.0], [0.0, 0.0]),
    v([0.5, -0.5, 0.5], [1.0, 0.0, 1.0], [1.0, 0.0]),
    v([-0.5, -0.5, -0.5], [0.0, 0.0, 0.0], [0.0, 1.0]),
    v([0.5, -0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 1.0]),
];

pub const CUBE_INDEX_COUNT: usize = 36;

/// Two clockwise triangles per face: (0, 1, 2) and (2, 1, 3).
pub fn cube_indices() -> [u16; CUBE_INDEX_COUNT] {
    let mut indices = [0u16; CUBE_INDEX_COUNT];
    for (face, chunk) in indices.chunks_exact_mut(6).enumerate() {
        let base = (face * 4) as u16;
        chunk.copy_from_slice(&[base, base + 1, base + 2, base + 2, base + 1, base + 3]);
    }
    indices
}

pub fn vertex_attributes() -> Vec<VertexAttribute> {
    vec![
        VertexAttribute {
            format: VertexFormat::Float32x3,
            offset: 0,
            location: 0,
        },
        VertexAttribute {
            format: VertexFormat::Float32x3,
            offset: 12,
            location: 1,
        },
        VertexAttribute {
            format: VertexFormat::Float32x2,
            offset: 24,
            location: 2,
        },
    ]
}

/// Pipeline drawing the textured cube into a BGRA8 target with 32-bit depth.
pub fn cube_pipeline_descriptor() -> PipelineDescriptor {
    PipelineDescriptor {
        label: Some("cube pipeline".to_string()),
        vertex_stride: std::mem::size_of::<CubeVertex>() as u64,
        vertex_attributes: vertex_attributes(),
        bindings: vec![
            BindingKind::ConstantBuffer,
            BindingKind::ShaderResource,
            BindingKind::UnorderedAccess,
        ],
        sampler: StaticSampler {
            point_min_mag: true,
            linear_mip: true,
            border_addressing: true,
            max_lod: f32::MAX,
        },
        color_format: TextureFormat::Bgra8Unorm,
        depth_format: TextureFormat::Depth32Float,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_stay_within_their_face() {
        let indices = cube_indices();
        for (face, tri) in indices.chunks_exact(6).enumerate() {
            let base = face as u16 * 4;
            assert!(tri.iter().all(|&i| (base..base + 4).contains(&i)));
        }
        assert_eq!(indices[..6], [0, 1, 2, 2, 1, 3]);
        assert_eq!(*indices.iter().max().unwrap() as usize, CUBE_VERTICES.len() - 1);
    }

    #[test]
    fn test_every_face_has_full_uv_range() {
        for face in CUBE_VERTICES.chunks_exact(4) {
            let uvs: Vec<[f32; 2]> = face.iter().map(|v| v.uv).collect();
            assert_eq!(uvs, vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]);
        }
    }

    #[test]
    fn test_attribute_offsets_match_layout() {
        let attributes = vertex_attributes();
        let end = attributes
            .iter()
            .map(|a| a.offset + a.format.size())
            .max()
            .unwrap();
        assert_eq!(end, std::mem::size_of::<CubeVertex>() as u64);
    }
}
