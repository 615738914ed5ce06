//! Screen-space projection and tile footprints.
//!
//! The host pipeline calls [`project`] directly; `PROJECT_SHADER` performs
//! the same steps per invocation.

use glam::{Vec3, Vec4Swizzles};

use crate::{CameraUniform, KeyLayout, ProjectedSplat, Splat};

/// Project one splat and compute its clamped tile rectangle.
///
/// Splats behind the near plane, beyond the far plane, with non-finite
/// position or radius, or with a footprint entirely outside the grid come
/// back with `fanout == 0`. Culling is never an error.
pub fn project(
    splat: &Splat,
    camera: &CameraUniform,
    layout: &KeyLayout,
    max_footprint: u32,
) -> ProjectedSplat {
    let culled = ProjectedSplat::default();

    let view_pos = camera.view_matrix() * Vec3::from(splat.position).extend(1.0);
    let depth = -view_pos.z;
    if !depth.is_finite() || !splat.radius.is_finite() || splat.radius < 0.0 {
        return culled;
    }
    if depth < camera.znear || depth > camera.zfar {
        return culled;
    }

    let clip = camera.proj_matrix() * view_pos;
    if clip.w <= 0.0 {
        return culled;
    }
    let ndc = clip.xy() / clip.w;
    let [width, height] = camera.viewport;
    let px = (ndc.x * 0.5 + 0.5) * width;
    let py = (0.5 - ndc.y * 0.5) * height;
    let radius_px = splat.radius * camera.proj[1][1] * 0.5 * height / depth;
    if !px.is_finite() || !py.is_finite() || !radius_px.is_finite() {
        return culled;
    }

    let tile_size = camera.tile_size as f32;
    let Some((x0, x1)) = axis_span(px, radius_px, tile_size, camera.tiles[0], max_footprint)
    else {
        return culled;
    };
    let Some((y0, y1)) = axis_span(py, radius_px, tile_size, camera.tiles[1], max_footprint)
    else {
        return culled;
    };

    ProjectedSplat {
        depth,
        depth_key: layout.quantize_depth(depth, camera.znear, camera.zfar),
        fanout: (x1 - x0 + 1) * (y1 - y0 + 1),
        _pad: 0,
        rect: [x0, y0, x1, y1],
    }
}

/// Inclusive tile range along one axis covered by `[center - r, center + r]`,
/// clipped to `[0, tiles)` and limited to `max_span` tiles around the
/// centre tile.
pub fn axis_span(
    center: f32,
    radius: f32,
    tile_size: f32,
    tiles: u32,
    max_span: u32,
) -> Option<(u32, u32)> {
    let n = tiles as f32;
    // Clamp in float first so the integer conversion never saturates.
    let lo = ((center - radius) / tile_size).floor().clamp(-1.0, n) as i32;
    let hi = ((center + radius) / tile_size).floor().clamp(-1.0, n) as i32;
    let mid = (center / tile_size).floor().clamp(-1.0, n) as i32;

    let tiles = tiles as i32;
    if hi < 0 || lo >= tiles {
        return None;
    }
    let lo = lo.max(0);
    let hi = hi.min(tiles - 1);

    let max_span = max_span.max(1) as i32;
    if hi - lo + 1 > max_span {
        let mid = mid.clamp(lo, hi);
        let start = (mid - (max_span - 1) / 2).max(lo).min(hi - (max_span - 1));
        return Some((start as u32, (start + max_span - 1) as u32));
    }
    Some((lo as u32, hi as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;

    fn camera() -> CameraUniform {
        // Looking down -Z from the origin at a 256x256 viewport.
        CameraUniform::new(
            Mat4::IDENTITY,
            Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0),
            256,
            256,
            0.1,
            100.0,
            16,
        )
    }

    fn layout() -> KeyLayout {
        camera().grid().key_layout()
    }

    #[test]
    fn test_centered_splat_covers_middle_tiles() {
        let p = project(&Splat::new([0.0, 0.0, -10.0], 0.1), &camera(), &layout(), 32);
        assert!(p.is_visible());
        assert!((p.depth - 10.0).abs() < 1e-5);
        // focal = 128px, radius = 0.1 * 128 / 10 = 1.28px around (128, 128)
        assert_eq!(p.rect, [7, 7, 8, 8]);
        assert_eq!(p.fanout, 4);
    }

    #[test]
    fn test_behind_camera_is_culled() {
        let p = project(&Splat::new([0.0, 0.0, 5.0], 1.0), &camera(), &layout(), 32);
        assert_eq!(p.fanout, 0);
        let p = project(&Splat::new([0.0, 0.0, -0.05], 1.0), &camera(), &layout(), 32);
        assert_eq!(p.fanout, 0);
        let p = project(&Splat::new([0.0, 0.0, -200.0], 1.0), &camera(), &layout(), 32);
        assert_eq!(p.fanout, 0);
    }

    #[test]
    fn test_non_finite_is_culled() {
        let cam = camera();
        for splat in [
            Splat::new([f32::NAN, 0.0, -10.0], 1.0),
            Splat::new([0.0, 0.0, f32::INFINITY], 1.0),
            Splat::new([0.0, 0.0, -10.0], f32::NAN),
            Splat::new([0.0, 0.0, -10.0], -1.0),
        ] {
            assert_eq!(project(&splat, &cam, &layout(), 32).fanout, 0, "{splat:?}");
        }
    }

    #[test]
    fn test_offscreen_is_culled() {
        // Far to the right of a 90 degree frustum.
        let p = project(&Splat::new([50.0, 0.0, -10.0], 0.1), &camera(), &layout(), 32);
        assert_eq!(p.fanout, 0);
    }

    #[test]
    fn test_partially_offscreen_is_clipped() {
        // Centre at the left edge, radius 12.8px.
        let p = project(&Splat::new([-10.0, 0.0, -10.0], 1.0), &camera(), &layout(), 32);
        assert!(p.is_visible());
        assert_eq!(p.rect[0], 0);
        assert_eq!(p.rect[2], 0);
    }

    #[test]
    fn test_huge_footprint_is_bounded() {
        let p = project(&Splat::new([0.0, 0.0, -1.0], 50.0), &camera(), &layout(), 4);
        assert!(p.is_visible());
        assert_eq!(p.rect[2] - p.rect[0] + 1, 4);
        assert_eq!(p.rect[3] - p.rect[1] + 1, 4);
        assert_eq!(p.fanout, 16);
        // Window stays around the centre tile (8).
        assert!(p.rect[0] <= 8 && 8 <= p.rect[2]);
    }

    #[test]
    fn test_axis_span_edges() {
        assert_eq!(axis_span(8.0, 1.0, 16.0, 4, 32), Some((0, 0)));
        assert_eq!(axis_span(16.0, 0.0, 16.0, 4, 32), Some((1, 1)));
        assert_eq!(axis_span(-20.0, 1.0, 16.0, 4, 32), None);
        assert_eq!(axis_span(100.0, 1.0, 16.0, 4, 32), None);
        assert_eq!(axis_span(0.0, 1e30, 16.0, 4, 32), Some((0, 3)));
        assert_eq!(axis_span(0.0, 1e30, 16.0, 100, 3), Some((0, 2)));
        assert_eq!(axis_span(32.0, 1.0, 16.0, 0, 32), None);
    }
}
