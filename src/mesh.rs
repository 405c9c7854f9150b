// mesh.rs - 球面楔形网格 (每段 45°)

use glam::{Mat4, Vec3};

use crate::tiles::SEGMENT_ARC;

pub const SPHERE_RADIUS: f32 = 100.0;
pub const WEDGE_WIDTH_SEGMENTS: usize = 6;
pub const WEDGE_HEIGHT_SEGMENTS: usize = 48;

#[derive(Debug, Clone)]
pub struct SphereMesh {
    pub positions: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

/// Slice of a sphere between `phi_start` and `phi_start + phi_length`,
/// pole to pole. UVs use texture convention: v = 0 is the top row of the
/// image, at the north pole.
pub fn build_wedge(
    radius: f32,
    width_segments: usize,
    height_segments: usize,
    phi_start: f32,
    phi_length: f32,
) -> SphereMesh {
    let w = width_segments.max(1);
    let h = height_segments.max(2);

    let mut positions = Vec::with_capacity((w + 1) * (h + 1));
    let mut uvs = Vec::with_capacity((w + 1) * (h + 1));
    let mut indices = Vec::new();

    for iy in 0..=h {
        let v = iy as f32 / h as f32;
        let theta = std::f32::consts::PI * v;
        let sin_t = theta.sin();
        let y = radius * theta.cos();

        for ix in 0..=w {
            let u = ix as f32 / w as f32;
            let phi = phi_start + u * phi_length;

            positions.push([-radius * phi.cos() * sin_t, y, radius * phi.sin() * sin_t]);
            uvs.push([u, v]);
        }
    }

    let row = (w + 1) as u32;
    for iy in 0..h as u32 {
        for ix in 0..w as u32 {
            let a = iy * row + ix + 1;
            let b = iy * row + ix;
            let c = (iy + 1) * row + ix;
            let d = (iy + 1) * row + ix + 1;

            // 两极处的退化三角形不输出
            if iy != 0 {
                indices.extend_from_slice(&[a, b, d]);
            }
            if iy != h as u32 - 1 {
                indices.extend_from_slice(&[b, c, d]);
            }
        }
    }

    SphereMesh {
        positions,
        uvs,
        indices,
    }
}

/// The wedge every segment shares; segments differ only by rotation.
pub fn build_segment_wedge() -> SphereMesh {
    build_wedge(
        SPHERE_RADIUS,
        WEDGE_WIDTH_SEGMENTS,
        WEDGE_HEIGHT_SEGMENTS,
        0.0,
        SEGMENT_ARC,
    )
}

/// Model matrix for a segment: rotated into place about Y, then mirrored on X
/// so the texture reads correctly from inside the sphere.
pub fn segment_model_matrix(angular_offset: f32) -> Mat4 {
    Mat4::from_scale(Vec3::new(-1.0, 1.0, 1.0)) * Mat4::from_rotation_y(angular_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::SEGMENT_COUNT;

    #[test]
    fn wedge_vertices_sit_on_the_sphere() {
        let mesh = build_segment_wedge();
        assert_eq!(
            mesh.positions.len(),
            (WEDGE_WIDTH_SEGMENTS + 1) * (WEDGE_HEIGHT_SEGMENTS + 1)
        );
        assert_eq!(mesh.positions.len(), mesh.uvs.len());
        for p in &mesh.positions {
            let r = Vec3::from_array(*p).length();
            assert!((r - SPHERE_RADIUS).abs() < 1e-3);
        }
    }

    #[test]
    fn pole_rows_skip_degenerate_triangles() {
        let mesh = build_wedge(1.0, 6, 48, 0.0, SEGMENT_ARC);
        // 6 * 48 格, 每格 2 个三角形, 两极各少一行
        let triangles = 6 * 48 * 2 - 2 * 6;
        assert_eq!(mesh.indices.len(), triangles * 3);
        let max = *mesh.indices.iter().max().unwrap() as usize;
        assert!(max < mesh.positions.len());
    }

    #[test]
    fn uvs_span_the_whole_image() {
        let mesh = build_wedge(1.0, 4, 8, 0.0, SEGMENT_ARC);
        assert_eq!(mesh.uvs.first(), Some(&[0.0, 0.0]));
        assert_eq!(mesh.uvs.last(), Some(&[1.0, 1.0]));
        // 北极在纹理顶部
        assert!(mesh.positions[0][1] > 0.99);
    }

    #[test]
    fn segments_tile_the_equator_in_order() {
        // h = 2: row 1 is the equator
        let w = 6;
        let mesh = build_wedge(1.0, w, 2, 0.0, SEGMENT_ARC);
        let start = Vec3::from_array(mesh.positions[w + 1]);
        let end = Vec3::from_array(mesh.positions[2 * w + 1]);

        for i in 0..SEGMENT_COUNT {
            let offset = i as f32 * SEGMENT_ARC;
            let m = segment_model_matrix(offset);
            let from = m.transform_point3(start);
            let to = m.transform_point3(end);

            // 镜像后第 i 段从方位角 offset 开始, 到 offset + 45° 结束
            let expect_from = Vec3::new(offset.cos(), 0.0, offset.sin());
            let next = offset + SEGMENT_ARC;
            let expect_to = Vec3::new(next.cos(), 0.0, next.sin());
            assert!(from.abs_diff_eq(expect_from, 1e-5), "segment {}: {:?}", i, from);
            assert!(to.abs_diff_eq(expect_to, 1e-5), "segment {}: {:?}", i, to);
        }
    }
}
