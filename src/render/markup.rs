//! Markup backend
//!
//! Renders each frame as a standalone HTML document with an inline SVG
//! scene. Robots are `<g>` groups keyed by id, lasers are `<line>`s drawn
//! after the static scene, and status overlays are plain `<div>` banners.

use std::fmt::Write as _;
use std::path::PathBuf;

use tracing::debug;

use crate::arena::effects::EffectPhase;
use crate::render::{ArenaScene, EffectSprite, GridLayout, RenderError, SceneBackend, SceneFrame};

const STYLE: &str = "body{background:#14161c;color:#dde;font-family:monospace}\
.banner{padding:4px 8px;margin-bottom:6px}\
.banner.connecting{background:#335}.banner.stale{background:#553}\
.banner.error{background:#722}.banner.closed{background:#333}\
.floor{fill:#1e2129;stroke:#2f3440}\
.obstacle{fill:#5a5f6e}\
.robot circle{stroke:#111;stroke-width:1}\
.robot-idle circle{fill:#4a90d9}.robot-moving circle{fill:#50c878}\
.robot-crashed circle{fill:#e0a030}.robot-destroyed circle{fill:#555}\
.robot-winner circle{fill:#ffd700;stroke:#fff;stroke-width:3}\
.laser-hit{stroke:#ff4136}.laser-miss{stroke:#a0a8b8}\
.burst{fill:#ff851b}";

/// Escape text for HTML content and attribute values
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// HTML + SVG frame writer
#[derive(Debug)]
pub struct MarkupBackend {
    cell_px: u32,
    layout: Option<GridLayout>,
    output: Option<PathBuf>,
    /// Everything up to and including the static scene
    head: String,
    /// Laser elements for the current frame
    effects: String,
    /// Everything after the closing `</svg>`
    tail: String,
    /// Whether the current frame has an open `<svg>`
    has_scene: bool,
    document: String,
    torn_down: bool,
}

impl MarkupBackend {
    pub fn new(cell_px: u32) -> Self {
        Self {
            cell_px,
            layout: None,
            output: None,
            head: String::new(),
            effects: String::new(),
            tail: String::new(),
            has_scene: false,
            document: String::new(),
            torn_down: false,
        }
    }

    /// Also write every presented frame to `path`
    pub fn with_output(mut self, path: PathBuf) -> Self {
        self.output = Some(path);
        self
    }

    /// Last presented document
    pub fn document(&self) -> &str {
        &self.document
    }

    fn layout_for(&mut self, scene: &ArenaScene) -> GridLayout {
        match self.layout {
            Some(layout) if layout.width == scene.width && layout.height == scene.height => layout,
            _ => {
                let layout = GridLayout::new(scene.width, scene.height, self.cell_px);
                self.layout = Some(layout);
                layout
            }
        }
    }

    fn write_scene(&mut self, scene: &ArenaScene) {
        let layout = self.layout_for(scene);
        let cell = self.cell_px as f32;
        let head = &mut self.head;

        let _ = write!(
            head,
            "<h1>{}</h1><p class=\"phase\">arena {} &middot; {}</p>",
            escape_html(&scene.name),
            escape_html(&scene.arena_id),
            escape_html(&scene.phase)
        );
        if let Some(winner) = &scene.winner {
            let _ = write!(
                head,
                "<p class=\"winner\">{}</p>",
                escape_html(&winner.label())
            );
        }

        let _ = write!(
            head,
            "<svg xmlns=\"http://www.w3.org/2000/svg\" class=\"arena\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">\
             <rect class=\"floor\" x=\"0\" y=\"0\" width=\"{w}\" height=\"{h}\"/>",
            w = layout.pixel_width(),
            h = layout.pixel_height()
        );

        for group in &scene.obstacles {
            let class = escape_html(&group.kind.to_ascii_lowercase());
            for pos in &group.cells {
                let (x, y) = layout.cell_origin(pos.x as f32, pos.y as f32);
                let _ = write!(
                    head,
                    "<rect class=\"obstacle obstacle-{}\" x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\"/>",
                    class, x, y, cell, cell
                );
            }
        }

        for entity in &scene.entities {
            let (cx, cy) = layout.cell_center(entity.x, entity.y);
            let radius = cell * 0.4;
            let (dx, dy) = entity.facing.delta();
            // Pixel y grows downward
            let (fx, fy) = (cx + dx as f32 * radius, cy - dy as f32 * radius);
            let _ = write!(
                head,
                "<g class=\"robot robot-{variant}\" data-id=\"{id}\" data-status=\"{status}\">\
                 <circle cx=\"{cx:.1}\" cy=\"{cy:.1}\" r=\"{r:.1}\"/>\
                 <line x1=\"{cx:.1}\" y1=\"{cy:.1}\" x2=\"{fx:.1}\" y2=\"{fy:.1}\" stroke=\"#111\"/>\
                 <text x=\"{cx:.1}\" y=\"{ty:.1}\" font-size=\"{fs:.1}\" text-anchor=\"middle\" fill=\"#dde\">{name}</text></g>",
                variant = entity.variant.as_str(),
                id = escape_html(entity.id.as_str()),
                status = escape_html(&entity.status),
                cx = cx,
                cy = cy,
                r = radius,
                fx = fx,
                fy = fy,
                ty = cy - radius - 2.0,
                fs = (cell * 0.45).max(6.0),
                name = escape_html(&entity.name),
            );
        }

        self.has_scene = true;

        let tail = &mut self.tail;
        tail.push_str("<ol class=\"actions\">");
        for action in &scene.actions {
            let _ = write!(
                tail,
                "<li><span class=\"time\">{}</span> {} <b>{}</b></li>",
                escape_html(&action.timestamp),
                escape_html(&action.entity_name),
                escape_html(&action.action_kind)
            );
        }
        tail.push_str("</ol>");
    }
}

impl SceneBackend for MarkupBackend {
    fn name(&self) -> &'static str {
        "markup"
    }

    fn rebuild(&mut self, width: u32, height: u32) {
        debug!("Markup scene rebuilt for {}x{}", width, height);
        self.layout = Some(GridLayout::new(width, height, self.cell_px));
    }

    fn render_snapshot(&mut self, frame: &SceneFrame) -> Result<(), RenderError> {
        if self.torn_down {
            return Err(RenderError::TornDown);
        }
        self.head.clear();
        self.effects.clear();
        self.tail.clear();
        self.has_scene = false;

        let title = frame
            .scene
            .as_ref()
            .map_or("Arena", |scene| scene.name.as_str());
        let _ = write!(
            self.head,
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title><style>{}</style></head><body>",
            escape_html(title),
            STYLE
        );
        if let Some(banner) = &frame.banner {
            let _ = write!(
                self.head,
                "<div class=\"banner {}\">{}</div>",
                banner.css_class(),
                escape_html(&banner.text())
            );
        }

        match &frame.scene {
            Some(scene) => self.write_scene(scene),
            None => self.head.push_str("<p class=\"placeholder\">Waiting for the first snapshot</p>"),
        }
        Ok(())
    }

    fn render_effect(&mut self, effect: &EffectSprite) -> Result<(), RenderError> {
        if self.torn_down {
            return Err(RenderError::TornDown);
        }
        // Effects need a scene to be placed in
        let Some(layout) = self.layout.filter(|_| self.has_scene) else {
            return Ok(());
        };

        let (x1, y1) = layout.grid_center(effect.from);
        let (x2, y2) = layout.grid_center(effect.to);
        let class = if effect.hit { "laser-hit" } else { "laser-miss" };
        let width = match effect.phase {
            EffectPhase::Active => 3.0,
            EffectPhase::Faded => 1.5,
        };
        let _ = write!(
            self.effects,
            "<line class=\"laser {} laser-{}\" x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke-width=\"{}\" stroke-opacity=\"{:.2}\"/>",
            class,
            effect.phase.as_str(),
            x1,
            y1,
            x2,
            y2,
            width,
            effect.intensity
        );
        if let Some(at) = effect.burst_at {
            let (bx, by) = layout.grid_center(at);
            let _ = write!(
                self.effects,
                "<circle class=\"burst\" cx=\"{:.1}\" cy=\"{:.1}\" r=\"{:.1}\" fill-opacity=\"{:.2}\"/>",
                bx,
                by,
                self.cell_px as f32 * 0.35,
                effect.intensity
            );
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), RenderError> {
        if self.torn_down {
            return Err(RenderError::TornDown);
        }
        let mut document =
            String::with_capacity(self.head.len() + self.effects.len() + self.tail.len() + 32);
        document.push_str(&self.head);
        if self.has_scene {
            document.push_str(&self.effects);
            document.push_str("</svg>");
        }
        document.push_str(&self.tail);
        document.push_str("</body></html>");
        self.document = document;

        if let Some(path) = &self.output {
            std::fs::write(path, self.document.as_bytes()).map_err(|source| RenderError::Io {
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
        debug!("Markup backend torn down");
        self.torn_down = true;
        self.layout = None;
        self.head.clear();
        self.effects.clear();
        self.tail.clear();
    }
}
