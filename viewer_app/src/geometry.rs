//! Procedural meshes and textures for the viewer

use render_core::vulkan::resources::mesh::Vertex;

const FACE_TINTS: [[f32; 3]; 6] = [
    [1.0, 0.85, 0.85],
    [0.85, 1.0, 0.85],
    [0.85, 0.85, 1.0],
    [1.0, 1.0, 0.85],
    [0.85, 1.0, 1.0],
    [1.0, 0.85, 1.0],
];

/// Unit cube centered at the origin, four vertices per face, counter-clockwise outward faces
pub fn cube() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, u axis, v axis) with u x v = normal
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];
    let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for ((normal, u, v), tint) in faces.iter().zip(FACE_TINTS) {
        let base = vertices.len() as u32;
        for (su, sv) in corners {
            let position = [0, 1, 2].map(|axis| 0.5 * (normal[axis] + su * u[axis] + sv * v[axis]));
            let uv = [(su + 1.0) * 0.5, 1.0 - (sv + 1.0) * 0.5];
            vertices.push(Vertex::new(position, tint, uv));
        }
        indices.extend([base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    (vertices, indices)
}

/// RGBA8 checkerboard of `cells` x `cells` squares
pub fn checkerboard(size: u32, cells: u32) -> Vec<u8> {
    let cell = (size / cells.max(1)).max(1);
    (0..size)
        .flat_map(|y| {
            (0..size).flat_map(move |x| {
                if (x / cell + y / cell) % 2 == 0 {
                    [235, 235, 235, 255]
                } else {
                    [40, 40, 48, 255]
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
        [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
    }

    fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
        [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
    }

    #[test]
    fn test_cube_faces_point_outward() {
        let (vertices, indices) = cube();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        for triangle in indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|i| vertices[triangle[i] as usize].position);
            let normal = cross(sub(b, a), sub(c, a));
            let centroid = [0, 1, 2].map(|axis| (a[axis] + b[axis] + c[axis]) / 3.0);
            let outward: f32 = (0..3).map(|axis| normal[axis] * centroid[axis]).sum();
            assert!(outward > 0.0);
        }
    }

    #[test]
    fn test_checkerboard_alternates() {
        let pixels = checkerboard(4, 2);
        assert_eq!(pixels.len(), 4 * 4 * 4);
        assert_eq!(&pixels[0..4], &[235, 235, 235, 255]);
        assert_eq!(&pixels[8..12], &[40, 40, 48, 255]);
    }
}
