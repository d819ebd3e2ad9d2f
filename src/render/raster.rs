//! Raster backend
//!
//! Draws each frame into an RGBA framebuffer and encodes it as PNG. The top
//! `cell_px` rows are a status strip coloured by the current banner; the
//! arena sits below it.

use std::path::PathBuf;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tracing::{debug, warn};

use crate::arena::effects::EffectPhase;
use crate::arena::entity_tracker::VisualVariant;
use crate::arena::model::GridPos;
use crate::render::{
    ArenaScene, Banner, EffectSprite, GridLayout, RenderError, SceneBackend, SceneFrame,
};

const CLEAR_COLOR: [u8; 4] = [20, 22, 28, 255];
const FLOOR_COLOR: [u8; 4] = [30, 33, 41, 255];
const GRID_COLOR: [u8; 4] = [47, 52, 64, 255];
const OBSTACLE_COLOR: [u8; 4] = [90, 95, 110, 255];
const FACING_COLOR: [u8; 4] = [17, 17, 17, 255];
pub const WINNER_COLOR: [u8; 4] = [255, 215, 0, 255];
pub const HIT_COLOR: [u8; 4] = [255, 65, 54, 255];
pub const MISS_COLOR: [u8; 4] = [160, 168, 184, 255];
const BURST_COLOR: [u8; 4] = [255, 133, 27, 255];

const BANNER_CONNECTING: [u8; 4] = [51, 51, 85, 255];
const BANNER_STALE: [u8; 4] = [85, 85, 51, 255];
const BANNER_ERROR: [u8; 4] = [119, 34, 34, 255];
const BANNER_CLOSED: [u8; 4] = [51, 51, 51, 255];

/// Placeholder canvas size in cells when there is no snapshot yet
const PLACEHOLDER_CELLS: u32 = 16;

/// Largest framebuffer side in pixels
const MAX_SIDE_PX: u32 = 16_384;

pub fn variant_color(variant: VisualVariant) -> [u8; 4] {
    match variant {
        VisualVariant::Idle => [74, 144, 217, 255],
        VisualVariant::Moving => [80, 200, 120, 255],
        VisualVariant::Crashed => [224, 160, 48, 255],
        VisualVariant::Destroyed => [85, 85, 85, 255],
        VisualVariant::Winner => WINNER_COLOR,
    }
}

fn banner_color(banner: Option<&Banner>) -> [u8; 4] {
    match banner {
        None => CLEAR_COLOR,
        Some(Banner::Connecting) => BANNER_CONNECTING,
        Some(Banner::Stale { .. }) => BANNER_STALE,
        Some(Banner::Error { .. }) => BANNER_ERROR,
        Some(Banner::Closed) => BANNER_CLOSED,
    }
}

/// Mix `color` over `dst` with coverage `alpha` in 0..=1
fn blend(dst: [u8; 4], color: [u8; 4], alpha: f32) -> [u8; 4] {
    let a = alpha.clamp(0.0, 1.0);
    let mix = |d: u8, c: u8| (d as f32 + (c as f32 - d as f32) * a).round() as u8;
    [
        mix(dst[0], color[0]),
        mix(dst[1], color[1]),
        mix(dst[2], color[2]),
        255,
    ]
}

/// Liang-Barsky clip of `from -> to` against `(x_min, y_min, x_max, y_max)`
///
/// Returns whole-pixel endpoints inside the rectangle, or `None` when the
/// segment misses it.
fn clip_segment(
    from: (f64, f64),
    to: (f64, f64),
    (x_min, y_min, x_max, y_max): (f64, f64, f64, f64),
) -> Option<((i32, i32), (i32, i32))> {
    let finite = [from.0, from.1, to.0, to.1].iter().all(|v| v.is_finite());
    if !finite || x_max < x_min || y_max < y_min {
        return None;
    }
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [
        (-dx, from.0 - x_min),
        (dx, x_max - from.0),
        (-dy, from.1 - y_min),
        (dy, y_max - from.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    let at = |t: f64| {
        let x = (from.0 + t * dx).round().clamp(x_min, x_max);
        let y = (from.1 + t * dy).round().clamp(y_min, y_max);
        (x as i32, y as i32)
    };
    Some((at(t0), at(t1)))
}

/// RGBA framebuffer with PNG output
#[derive(Debug)]
pub struct RasterBackend {
    cell_px: u32,
    layout: Option<GridLayout>,
    output: Option<PathBuf>,
    width: u32,
    height: u32,
    frame: Vec<u8>,
    /// Pixel rows above the arena
    top: i32,
    has_scene: bool,
    torn_down: bool,
}

impl RasterBackend {
    pub fn new(cell_px: u32) -> Self {
        Self {
            cell_px,
            layout: None,
            output: None,
            width: 0,
            height: 0,
            frame: Vec::new(),
            top: cell_px as i32,
            has_scene: false,
            torn_down: false,
        }
    }

    /// Also write every presented frame to `path`
    pub fn with_output(mut self, path: PathBuf) -> Self {
        self.output = Some(path);
        self
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Read back one pixel of the current frame
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.frame.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Encode the current frame as PNG
    pub fn encode_png(&self) -> Result<Vec<u8>, RenderError> {
        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes).write_image(
            &self.frame,
            self.width,
            self.height,
            ExtendedColorType::Rgba8,
        )?;
        Ok(bytes)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            self.width = width;
            self.height = height;
            self.frame = vec![0; width as usize * height as usize * 4];
        }
    }

    fn put(&mut self, x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        self.frame[offset..offset + 4].copy_from_slice(&color);
    }

    fn put_blended(&mut self, x: i32, y: i32, color: [u8; 4], alpha: f32) {
        if x < 0 || y < 0 {
            return;
        }
        let Some(dst) = self.pixel(x as u32, y as u32) else {
            return;
        };
        self.put(x, y, blend(dst, color, alpha));
    }

    fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: [u8; 4]) {
        for py in y..y + h {
            for px in x..x + w {
                self.put(px, py, color);
            }
        }
    }

    fn draw_square(&mut self, cx: i32, cy: i32, half_size: i32, color: [u8; 4]) {
        self.fill_rect(cx - half_size, cy - half_size, half_size * 2 + 1, half_size * 2 + 1, color);
    }

    fn draw_square_outline(&mut self, cx: i32, cy: i32, half_size: i32, color: [u8; 4]) {
        let (left, right) = (cx - half_size, cx + half_size);
        let (top, bottom) = (cy - half_size, cy + half_size);
        for x in left..=right {
            self.put(x, top, color);
            self.put(x, bottom, color);
        }
        for y in top..=bottom {
            self.put(left, y, color);
            self.put(right, y, color);
        }
    }

    fn draw_cross(&mut self, cx: i32, cy: i32, half_size: i32, color: [u8; 4], alpha: f32) {
        for d in -half_size..=half_size {
            self.put_blended(cx + d, cy + d, color, alpha);
            self.put_blended(cx + d, cy - d, color, alpha);
        }
    }

    /// Bresenham line, blended
    ///
    /// Callers clip first; the walk visits every pixel between the endpoints.
    fn draw_line(&mut self, from: (i32, i32), to: (i32, i32), color: [u8; 4], alpha: f32) {
        let (mut x0, mut y0) = (from.0 as i64, from.1 as i64);
        let (x1, y1) = (to.0 as i64, to.1 as i64);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.put_blended(x0 as i32, y0 as i32, color, alpha);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    /// Frame pixel for a point in arena pixel space
    ///
    /// `None` when the point lies further than two cells outside the frame.
    fn frame_point(&self, px: f32, py: f32) -> Option<(i32, i32)> {
        let x = px.floor() as f64;
        let y = py.floor() as f64 + self.top as f64;
        let margin = self.cell_px as f64 * 2.0;
        let inside = x >= -margin
            && y >= -margin
            && x <= self.width as f64 + margin
            && y <= self.height as f64 + margin;
        inside.then_some((x as i32, y as i32))
    }

    fn center_px(&self, layout: &GridLayout, x: f32, y: f32) -> Option<(i32, i32)> {
        let (cx, cy) = layout.cell_center(x, y);
        self.frame_point(cx, cy)
    }

    /// Arena-space cell center in frame coordinates, unclamped
    fn center_f64(&self, layout: &GridLayout, pos: GridPos) -> (f64, f64) {
        let cell = self.cell_px as f64;
        let flipped = layout.height.max(1) as f64 - 1.0 - pos.y as f64;
        (
            (pos.x as f64 * cell + cell / 2.0).floor(),
            (flipped * cell + cell / 2.0).floor() + self.top as f64,
        )
    }

    /// Clip a beam to the arena area and draw whatever is left of it
    fn draw_beam(&mut self, from: (f64, f64), to: (f64, f64), color: [u8; 4], alpha: f32) {
        let area = (
            0.0,
            self.top as f64,
            self.width as f64 - 1.0,
            self.height as f64 - 1.0,
        );
        if let Some((a, b)) = clip_segment(from, to, area) {
            self.draw_line(a, b, color, alpha);
        }
    }

    /// Pixel size of the frame for `layout`, status strip included
    fn frame_size(&self, layout: &GridLayout) -> Result<(u32, u32), RenderError> {
        let size = layout
            .checked_pixel_size()
            .and_then(|(w, h)| Some((w, h.checked_add(self.top as u32)?)));
        match size {
            Some((w, h)) if w <= MAX_SIDE_PX && h <= MAX_SIDE_PX => Ok((w, h)),
            _ => Err(RenderError::Oversized {
                width: layout.width,
                height: layout.height,
            }),
        }
    }

    fn draw_scene(&mut self, scene: &ArenaScene, layout: GridLayout) {
        let cell = self.cell_px as i32;
        self.fill_rect(0, self.top, layout.pixel_width() as i32, layout.pixel_height() as i32, FLOOR_COLOR);

        for gx in 0..=layout.width as i32 {
            for y in self.top..self.top + layout.pixel_height() as i32 {
                self.put(gx * cell, y, GRID_COLOR);
            }
        }
        for gy in 0..=layout.height as i32 {
            for x in 0..layout.pixel_width() as i32 {
                self.put(x, self.top + gy * cell, GRID_COLOR);
            }
        }

        for group in &scene.obstacles {
            for pos in &group.cells {
                let (x, y) = layout.cell_origin(pos.x as f32, pos.y as f32);
                if let Some((x, y)) = self.frame_point(x, y) {
                    self.fill_rect(x, y, cell, cell, OBSTACLE_COLOR);
                }
            }
        }

        let half = (cell * 35 / 100).max(1);
        for entity in &scene.entities {
            let Some((cx, cy)) = self.center_px(&layout, entity.x, entity.y) else {
                continue;
            };
            self.draw_square(cx, cy, half, variant_color(entity.variant));
            if entity.variant == VisualVariant::Winner {
                self.draw_square_outline(cx, cy, half + 2, WINNER_COLOR);
                self.draw_square_outline(cx, cy, half + 3, WINNER_COLOR);
            }
            let (dx, dy) = entity.facing.delta();
            self.draw_line((cx, cy), (cx + dx * half, cy - dy * half), FACING_COLOR, 1.0);
        }
    }
}

impl SceneBackend for RasterBackend {
    fn name(&self) -> &'static str {
        "raster"
    }

    fn rebuild(&mut self, width: u32, height: u32) {
        let layout = GridLayout::new(width, height, self.cell_px);
        self.layout = Some(layout);
        match self.frame_size(&layout) {
            Ok((w, h)) => {
                debug!("Raster scene rebuilt for {}x{}", width, height);
                self.resize(w, h);
            }
            Err(e) => warn!("{}", e),
        }
    }

    fn render_snapshot(&mut self, frame: &SceneFrame) -> Result<(), RenderError> {
        if self.torn_down {
            return Err(RenderError::TornDown);
        }

        let layout = match &frame.scene {
            Some(scene) => match self.layout {
                Some(l) if l.width == scene.width && l.height == scene.height => Some(l),
                _ => {
                    self.rebuild(scene.width, scene.height);
                    self.layout
                }
            },
            None => None,
        };

        match (layout, &frame.scene) {
            (Some(layout), Some(scene)) => {
                let (w, h) = match self.frame_size(&layout) {
                    Ok(size) => size,
                    Err(e) => {
                        self.has_scene = false;
                        return Err(e);
                    }
                };
                self.resize(w, h);
                self.frame.chunks_exact_mut(4).for_each(|px| px.copy_from_slice(&CLEAR_COLOR));
                self.draw_scene(scene, layout);
                self.has_scene = true;
            }
            _ => {
                let side = PLACEHOLDER_CELLS.saturating_mul(self.cell_px).min(MAX_SIDE_PX);
                self.resize(side, side + self.top as u32);
                self.frame.chunks_exact_mut(4).for_each(|px| px.copy_from_slice(&CLEAR_COLOR));
                self.has_scene = false;
            }
        }

        let strip = banner_color(frame.banner.as_ref());
        let width = self.width as i32;
        self.fill_rect(0, 0, width, self.top, strip);
        Ok(())
    }

    fn render_effect(&mut self, effect: &EffectSprite) -> Result<(), RenderError> {
        if self.torn_down {
            return Err(RenderError::TornDown);
        }
        let Some(layout) = self.layout.filter(|_| self.has_scene) else {
            return Ok(());
        };

        let color = if effect.hit { HIT_COLOR } else { MISS_COLOR };
        let from = self.center_f64(&layout, effect.from);
        let to = self.center_f64(&layout, effect.to);

        self.draw_beam(from, to, color, effect.intensity);
        if effect.phase == EffectPhase::Active {
            // Active beams are drawn three pixels wide
            let vertical = (to.0 - from.0).abs() < (to.1 - from.1).abs();
            let (ox, oy) = if vertical { (1.0, 0.0) } else { (0.0, 1.0) };
            self.draw_beam((from.0 + ox, from.1 + oy), (to.0 + ox, to.1 + oy), color, effect.intensity);
            self.draw_beam((from.0 - ox, from.1 - oy), (to.0 - ox, to.1 - oy), color, effect.intensity);
        }

        if let Some(GridPos { x, y }) = effect.burst_at {
            if let Some((bx, by)) = self.center_px(&layout, x as f32, y as f32) {
                let half = (self.cell_px as i32 * 35 / 100).max(1);
                self.draw_cross(bx, by, half, BURST_COLOR, effect.intensity);
                self.draw_cross(bx + 1, by, half, BURST_COLOR, effect.intensity);
            }
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), RenderError> {
        if self.torn_down {
            return Err(RenderError::TornDown);
        }
        if let Some(path) = &self.output {
            let bytes = self.encode_png()?;
            std::fs::write(path, bytes).map_err(|source| RenderError::Io {
                path: path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        debug!("Raster backend torn down");
        self.torn_down = true;
        self.layout = None;
        self.frame = Vec::new();
        self.width = 0;
        self.height = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::model::{EntityId, Facing, ObstacleGroup};
    use crate::render::{draw_frame, EntityView};

    const CELL: u32 = 10;

    fn scene(variant: VisualVariant) -> ArenaScene {
        ArenaScene {
            arena_id: "1".to_string(),
            name: "Test".to_string(),
            width: 10,
            height: 10,
            phase: "IN_PROGRESS".to_string(),
            obstacles: vec![ObstacleGroup {
                kind: "SQUARE".to_string(),
                cells: vec![GridPos::new(9, 0)],
            }],
            entities: vec![EntityView {
                id: EntityId::from("1"),
                name: "Alpha".to_string(),
                x: 2.0,
                y: 2.0,
                facing: Facing::East,
                status: "IDLE".to_string(),
                variant,
                remaining_distance: 0,
            }],
            winner: None,
            actions: vec![],
        }
    }

    fn laser(hit: bool, phase: EffectPhase, intensity: f32) -> EffectSprite {
        EffectSprite {
            from: GridPos::new(5, 2),
            to: GridPos::new(5, 8),
            hit,
            burst_at: hit.then_some(GridPos::new(5, 8)),
            phase,
            intensity,
        }
    }

    fn draw(frame: &SceneFrame) -> RasterBackend {
        let mut backend = RasterBackend::new(CELL);
        draw_frame(&mut backend, frame).unwrap();
        backend
    }

    #[test]
    fn test_framebuffer_size_includes_status_strip() {
        let backend = draw(&SceneFrame {
            scene: Some(scene(VisualVariant::Idle)),
            effects: vec![],
            banner: None,
        });
        assert_eq!(backend.dimensions(), (100, 110));
    }

    #[test]
    fn test_obstacle_drawn_bottom_right() {
        let backend = draw(&SceneFrame {
            scene: Some(scene(VisualVariant::Idle)),
            effects: vec![],
            banner: None,
        });
        // Cell (9, 0) is the bottom-right cell; +10 rows for the strip
        assert_eq!(backend.pixel(95, 105), Some(OBSTACLE_COLOR));
        assert_eq!(backend.pixel(5, 15), Some(FLOOR_COLOR));
    }

    #[test]
    fn test_entity_variant_and_winner_outline() {
        let idle = draw(&SceneFrame {
            scene: Some(scene(VisualVariant::Idle)),
            effects: vec![],
            banner: None,
        });
        // Cell (2, 2) center: x = 25, y = 75 + 10
        assert_eq!(idle.pixel(24, 84), Some(variant_color(VisualVariant::Idle)));

        let winner = draw(&SceneFrame {
            scene: Some(scene(VisualVariant::Winner)),
            effects: vec![],
            banner: None,
        });
        // half = 3, outline at 5 from center
        assert_eq!(winner.pixel(20, 80), Some(WINNER_COLOR));
        assert_ne!(idle.pixel(20, 80), Some(WINNER_COLOR));
    }

    #[test]
    fn test_laser_colors_and_fade() {
        let mk = |effect: EffectSprite| {
            draw(&SceneFrame {
                scene: Some(scene(VisualVariant::Idle)),
                effects: vec![effect],
                banner: None,
            })
        };
        // Beam runs along x = 55 from y = 85 up to y = 25
        let hit = mk(laser(true, EffectPhase::Active, 1.0));
        assert_eq!(hit.pixel(55, 45), Some(HIT_COLOR));
        assert_eq!(hit.pixel(56, 45), Some(HIT_COLOR));

        let miss = mk(laser(false, EffectPhase::Active, 1.0));
        assert_eq!(miss.pixel(55, 45), Some(MISS_COLOR));

        let faded = mk(laser(true, EffectPhase::Faded, 0.35));
        let px = faded.pixel(55, 45).unwrap();
        assert_ne!(px, HIT_COLOR);
        assert!(px[0] > FLOOR_COLOR[0]);
        // Faded beams are one pixel wide
        assert_eq!(faded.pixel(56, 45), Some(FLOOR_COLOR));
    }

    #[test]
    fn test_banner_strip_and_placeholder() {
        let backend = draw(&SceneFrame {
            scene: None,
            effects: vec![laser(true, EffectPhase::Active, 1.0)],
            banner: Some(Banner::Connecting),
        });
        assert_eq!(backend.dimensions(), (160, 170));
        assert_eq!(backend.pixel(3, 3), Some(BANNER_CONNECTING));
        assert_eq!(backend.pixel(80, 100), Some(CLEAR_COLOR));
    }

    #[test]
    fn test_encode_png() {
        let backend = draw(&SceneFrame {
            scene: Some(scene(VisualVariant::Idle)),
            effects: vec![],
            banner: Some(Banner::Stale { seconds: 3 }),
        });
        let png = backend.encode_png().unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_teardown() {
        let mut backend = RasterBackend::new(CELL);
        backend.teardown();
        assert_eq!(backend.dimensions(), (0, 0));
        assert!(matches!(backend.present(), Err(RenderError::TornDown)));
    }

    fn beam(from: GridPos, to: GridPos) -> EffectSprite {
        EffectSprite {
            from,
            to,
            hit: true,
            burst_at: Some(to),
            phase: EffectPhase::Active,
            intensity: 1.0,
        }
    }

    #[test]
    fn test_beam_far_outside_arena_is_clipped() {
        let backend = draw(&SceneFrame {
            scene: Some(scene(VisualVariant::Idle)),
            effects: vec![beam(GridPos::new(-100_000_000, 5), GridPos::new(100_000_000, 5))],
            banner: None,
        });
        // Row 5 center: (9 - 5) * 10 + 5 + 10 strip rows
        assert_eq!(backend.pixel(0, 55), Some(HIT_COLOR));
        assert_eq!(backend.pixel(50, 55), Some(HIT_COLOR));
        assert_eq!(backend.pixel(99, 55), Some(HIT_COLOR));
        // Status strip is left alone
        assert_eq!(backend.pixel(50, 5), Some(CLEAR_COLOR));
    }

    #[test]
    fn test_beam_with_distant_terminus_draws_visible_part() {
        let backend = draw(&SceneFrame {
            scene: Some(scene(VisualVariant::Idle)),
            effects: vec![beam(GridPos::new(0, 5), GridPos::new(20_000_000, 5))],
            banner: None,
        });
        assert_eq!(backend.pixel(5, 55), Some(HIT_COLOR));
        assert_eq!(backend.pixel(99, 55), Some(HIT_COLOR));
    }

    #[test]
    fn test_beam_missing_arena_draws_nothing() {
        let backend = draw(&SceneFrame {
            scene: Some(scene(VisualVariant::Idle)),
            effects: vec![beam(GridPos::new(-50, -50), GridPos::new(-40, -60))],
            banner: None,
        });
        assert_eq!(backend.pixel(5, 15), Some(FLOOR_COLOR));
    }

    #[test]
    fn test_clip_segment() {
        let area = (0.0, 0.0, 99.0, 49.0);
        assert_eq!(
            clip_segment((-1e12, 10.0), (1e12, 10.0), area),
            Some(((0, 10), (99, 10)))
        );
        assert_eq!(
            clip_segment((10.0, 10.0), (20.0, 20.0), area),
            Some(((10, 10), (20, 20)))
        );
        assert_eq!(clip_segment((-10.0, -10.0), (-1.0, 60.0), area), None);
        assert_eq!(clip_segment((f64::NAN, 0.0), (1.0, 1.0), area), None);
    }

    #[test]
    fn test_oversized_arena_is_an_error() {
        let mut huge = scene(VisualVariant::Idle);
        huge.width = u32::MAX / 2;
        let mut backend = RasterBackend::new(CELL);
        backend.rebuild(huge.width, huge.height);

        let frame = SceneFrame {
            scene: Some(huge),
            effects: vec![],
            banner: None,
        };
        assert!(matches!(
            draw_frame(&mut backend, &frame),
            Err(RenderError::Oversized { .. })
        ));

        // A sane arena afterwards renders normally
        draw_frame(
            &mut backend,
            &SceneFrame {
                scene: Some(scene(VisualVariant::Idle)),
                effects: vec![],
                banner: None,
            },
        )
        .unwrap();
        assert_eq!(backend.dimensions(), (100, 110));
    }

    #[test]
    fn test_entity_far_outside_arena_is_skipped() {
        let mut far = scene(VisualVariant::Idle);
        far.entities[0].x = 3.0e9;
        far.entities[0].y = -3.0e9;
        far.obstacles[0].cells.push(GridPos::new(i32::MAX, i32::MIN));
        let backend = draw(&SceneFrame {
            scene: Some(far),
            effects: vec![],
            banner: None,
        });
        assert_eq!(backend.pixel(24, 84), Some(FLOOR_COLOR));
    }

    #[test]
    fn test_blend() {
        assert_eq!(blend([0, 0, 0, 255], [200, 100, 50, 255], 0.5), [100, 50, 25, 255]);
        assert_eq!(blend([10, 10, 10, 255], [200, 100, 50, 255], 1.0), [200, 100, 50, 255]);
    }
}
