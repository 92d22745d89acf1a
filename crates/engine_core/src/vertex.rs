//! Vertex layout shared by every terrain mesh.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Terrain vertex with position, UV coordinates, normal and tangent.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
}

impl Vertex {
    pub fn new(position: Vec3, tex_coords: Vec2, normal: Vec3, tangent: Vec3) -> Self {
        Self {
            position: position.into(),
            tex_coords: tex_coords.into(),
            normal: normal.into(),
            tangent: tangent.into(),
        }
    }

    /// Height (world Y) of the vertex.
    #[inline]
    pub fn height(&self) -> f32 {
        self.position[1]
    }

    pub fn normal_vec(&self) -> Vec3 {
        Vec3::from(self.normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 11 * std::mem::size_of::<f32>());
        let v = Vertex::new(Vec3::new(1.0, 2.0, 3.0), Vec2::new(0.5, 0.25), Vec3::Y, Vec3::X);
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&v));
        assert_eq!(floats, &[1.0, 2.0, 3.0, 0.5, 0.25, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(v.height(), 2.0);
    }
}
