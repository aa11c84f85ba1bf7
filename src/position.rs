//! Popover placement.
//!
//! Given the viewport-relative rectangle of a step's target, the popover's
//! size and a preferred [`Placement`], [`compute_position`] returns the
//! document coordinates where the popover should be drawn. When the preferred
//! side would overflow the viewport the calculator walks a fixed fallback
//! order and, failing everything, centers the popover in the viewport. It
//! always returns a position.

use serde::{Deserialize, Serialize};

/// Gap between the target and the popover, in CSS pixels.
pub const POPOVER_SPACING: f64 = 12.0;
/// Minimum distance the popover keeps from every viewport edge.
pub const VIEWPORT_MARGIN: f64 = 16.0;

/// Fallback order tried after the preferred placement.
const FALLBACK_ORDER: [Placement; 5] = [
    Placement::Bottom,
    Placement::Top,
    Placement::Right,
    Placement::Left,
    Placement::Center,
];

/// Side of the target the popover is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Top,
    #[default]
    Bottom,
    Left,
    Right,
    /// Centered in the viewport, ignoring the target.
    Center,
}

/// A viewport-relative rectangle, as reported by `getBoundingClientRect`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(top: f64, left: f64, width: f64, height: f64) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Visible window of the document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn scrolled(mut self, scroll_x: f64, scroll_y: f64) -> Self {
        self.scroll_x = scroll_x;
        self.scroll_y = scroll_y;
        self
    }

    /// Whether a viewport-relative rectangle lies fully inside the viewport.
    pub fn contains(&self, rect: &Rect) -> bool {
        rect.top >= 0.0
            && rect.left >= 0.0
            && rect.bottom() <= self.height
            && rect.right() <= self.width
    }
}

/// Document coordinates of the popover's top-left corner plus the placement
/// that was actually used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub top: f64,
    pub left: f64,
    pub placement: Placement,
}

/// Compute where the popover goes for a target.
pub fn compute_position(
    target: &Rect,
    popover: Size,
    preferred: Placement,
    viewport: &Viewport,
) -> Position {
    let preferred_then_fallbacks =
        std::iter::once(preferred).chain(FALLBACK_ORDER.into_iter().filter(|p| *p != preferred));

    for placement in preferred_then_fallbacks {
        let candidate = candidate(target, popover, placement, viewport);
        if fits(&candidate, popover, viewport) {
            return candidate;
        }
    }

    compute_centered(popover, viewport)
}

/// Center the popover in the viewport. Used for targetless steps and as the
/// last resort of [`compute_position`].
pub fn compute_centered(popover: Size, viewport: &Viewport) -> Position {
    Position {
        top: viewport.scroll_y + (viewport.height - popover.height) / 2.0,
        left: viewport.scroll_x + (viewport.width - popover.width) / 2.0,
        placement: Placement::Center,
    }
}

fn candidate(target: &Rect, popover: Size, placement: Placement, viewport: &Viewport) -> Position {
    let (sx, sy) = (viewport.scroll_x, viewport.scroll_y);
    let centered_left = sx + target.left + (target.width - popover.width) / 2.0;
    let centered_top = sy + target.top + (target.height - popover.height) / 2.0;

    let (top, left) = match placement {
        Placement::Top => (sy + target.top - popover.height - POPOVER_SPACING, centered_left),
        Placement::Bottom => (sy + target.bottom() + POPOVER_SPACING, centered_left),
        Placement::Left => (centered_top, sx + target.left - popover.width - POPOVER_SPACING),
        Placement::Right => (centered_top, sx + target.right() + POPOVER_SPACING),
        Placement::Center => return compute_centered(popover, viewport),
    };

    Position {
        top,
        left,
        placement,
    }
}

fn fits(position: &Position, popover: Size, viewport: &Viewport) -> bool {
    let min_top = viewport.scroll_y + VIEWPORT_MARGIN;
    let min_left = viewport.scroll_x + VIEWPORT_MARGIN;
    let max_bottom = viewport.scroll_y + viewport.height - VIEWPORT_MARGIN;
    let max_right = viewport.scroll_x + viewport.width - VIEWPORT_MARGIN;

    position.top >= min_top
        && position.left >= min_left
        && position.top + popover.height <= max_bottom
        && position.left + popover.width <= max_right
}
