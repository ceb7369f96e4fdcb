//! Occupancy track: drivable cells, a start pose and an optional goal.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Position, SimulationError, Vehicle};

/// Spawn pose recorded by the track author. Heading is in degrees, counter-clockwise from +x.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct StartPose {
    pub x: f32,
    pub y: f32,
    pub heading: f32,
}

impl StartPose {
    #[must_use]
    pub const fn new(x: f32, y: f32, heading: f32) -> Self {
        Self { x, y, heading }
    }

    #[must_use]
    pub const fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Row-major occupancy grid. Immutable while episodes run; shared by reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "TrackCells")]
pub struct Track {
    width: u32,
    height: u32,
    cells: Vec<bool>,
    start: StartPose,
    goal: Option<Position>,
}

/// Wire shape of [`Track`]; deserialized tracks go through [`Track::from_cells`].
#[derive(Deserialize)]
struct TrackCells {
    width: u32,
    height: u32,
    cells: Vec<bool>,
    start: StartPose,
    goal: Option<Position>,
}

impl TryFrom<TrackCells> for Track {
    type Error = SimulationError;

    fn try_from(raw: TrackCells) -> Result<Self, Self::Error> {
        Self::from_cells(raw.width, raw.height, raw.cells, raw.start, raw.goal)
    }
}

impl Track {
    /// Build a track from explicit occupancy cells (`true` = drivable).
    pub fn from_cells(
        width: u32,
        height: u32,
        cells: Vec<bool>,
        start: StartPose,
        goal: Option<Position>,
    ) -> Result<Self, SimulationError> {
        if width == 0 || height == 0 {
            return Err(SimulationError::InvalidConfig(
                "track dimensions must be non-zero",
            ));
        }
        if cells.len() != (width as usize) * (height as usize) {
            return Err(SimulationError::InvalidConfig(
                "track cell count must equal width * height",
            ));
        }
        if !start.x.is_finite() || !start.y.is_finite() || !start.heading.is_finite() {
            return Err(SimulationError::InvalidConfig("start pose must be finite"));
        }
        Ok(Self {
            width,
            height,
            cells,
            start,
            goal,
        })
    }

    /// A track with nothing painted yet; every cell is off-road.
    pub fn unpainted(
        width: u32,
        height: u32,
        start: StartPose,
        goal: Option<Position>,
    ) -> Result<Self, SimulationError> {
        let cells = vec![false; (width as usize) * (height as usize)];
        Self::from_cells(width, height, cells, start, goal)
    }

    /// Fully drivable 1000x800 arena used as the explicit degraded default.
    #[must_use]
    pub fn open_arena() -> Self {
        Self {
            width: 1000,
            height: 800,
            cells: vec![true; 1000 * 800],
            start: StartPose::new(100.0, 400.0, 0.0),
            goal: Some(Position::new(900.0, 400.0)),
        }
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub const fn start(&self) -> StartPose {
        self.start
    }

    #[must_use]
    pub const fn goal(&self) -> Option<Position> {
        self.goal
    }

    pub fn set_start(&mut self, start: StartPose) {
        self.start = start;
    }

    pub fn set_goal(&mut self, goal: Option<Position>) {
        self.goal = goal;
    }

    #[must_use]
    pub fn cells(&self) -> &[bool] {
        &self.cells
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// Cell lookup by integer coordinates; `None` outside the grid.
    #[must_use]
    pub fn cell(&self, x: u32, y: u32) -> Option<bool> {
        if x < self.width && y < self.height {
            Some(self.cells[self.offset(x, y)])
        } else {
            None
        }
    }

    /// Whether the continuous coordinate lies on a drivable cell. Out of bounds is never drivable.
    #[must_use]
    pub fn is_drivable(&self, x: f32, y: f32) -> bool {
        if !(x >= 0.0 && y >= 0.0) {
            return false;
        }
        let (cx, cy) = (x.floor(), y.floor());
        if cx >= self.width as f32 || cy >= self.height as f32 {
            return false;
        }
        self.cells[self.offset(cx as u32, cy as u32)]
    }

    /// Mark every cell whose centre lies within `radius` of `(cx, cy)` as drivable.
    pub fn paint_disc(&mut self, cx: f32, cy: f32, radius: f32) {
        if radius <= 0.0 || !cx.is_finite() || !cy.is_finite() {
            return;
        }
        let radius_sq = radius * radius;
        let min_x = (cx - radius).floor().max(0.0) as u32;
        let min_y = (cy - radius).floor().max(0.0) as u32;
        let max_x = ((cx + radius).ceil().max(0.0) as u32).min(self.width - 1);
        let max_y = ((cy + radius).ceil().max(0.0) as u32).min(self.height - 1);
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= radius_sq {
                    let idx = self.offset(x, y);
                    self.cells[idx] = true;
                }
            }
        }
    }

    /// Paint a brush stroke through `points`, stamping discs densely enough to leave no gaps.
    pub fn paint_stroke(&mut self, points: &[Position], radius: f32) {
        let Some(first) = points.first() else {
            return;
        };
        self.paint_disc(first.x, first.y, radius);
        let spacing = (radius * 0.5).max(0.5);
        for pair in points.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let length = from.distance_to(to);
            let stamps = (length / spacing).ceil().max(1.0) as u32;
            for stamp in 1..=stamps {
                let t = stamp as f32 / stamps as f32;
                self.paint_disc(
                    from.x + (to.x - from.x) * t,
                    from.y + (to.y - from.y) * t,
                    radius,
                );
            }
        }
    }

    /// Mark the axis-aligned rectangle `[x0, x1) x [y0, y1)` as drivable.
    pub fn paint_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32) {
        for y in y0.min(self.height)..y1.min(self.height) {
            for x in x0.min(self.width)..x1.min(self.width) {
                let idx = self.offset(x, y);
                self.cells[idx] = true;
            }
        }
    }

    /// Derive a start pose from a recorded stroke: the first point, facing the first distinct
    /// point that follows it.
    #[must_use]
    pub fn start_from_stroke(points: &[Position]) -> Option<StartPose> {
        let first = *points.first()?;
        let mut facing = Vehicle::new(first, 0.0);
        if let Some(next) = points.iter().find(|p| **p != first) {
            facing.set_heading_towards(next.x - first.x, next.y - first.y);
        }
        Some(StartPose::new(first.x, first.y, facing.heading()))
    }

    /// Resolve the spawn point, snapping to the nearest drivable cell centre within `radius`
    /// when the recorded start is off-road. The search never extends past the track diagonal.
    pub fn resolve_spawn(&self, radius: f32) -> Result<StartPose, SimulationError> {
        let start = self.start;
        if self.is_drivable(start.x, start.y) {
            return Ok(start);
        }

        let diagonal = (self.width as f32).hypot(self.height as f32);
        let radius = radius.max(0.0).min(diagonal);
        let reach = radius.ceil() as i64;
        let origin_x = start.x.floor() as i64;
        let origin_y = start.y.floor() as i64;
        let columns = (origin_x - reach).max(0)..=(origin_x + reach).min(i64::from(self.width) - 1);
        let rows = (origin_y - reach).max(0)..=(origin_y + reach).min(i64::from(self.height) - 1);
        let mut best: Option<(f32, Position)> = None;
        for y in rows {
            for x in columns.clone() {
                let Some(true) = self.cell(x as u32, y as u32) else {
                    continue;
                };
                let centre = Position::new(x as f32 + 0.5, y as f32 + 0.5);
                let distance = centre.distance_to(start.position());
                if distance > radius {
                    continue;
                }
                if best.is_none_or(|(current, _)| distance < current) {
                    best = Some((distance, centre));
                }
            }
        }

        match best {
            Some((distance, centre)) => {
                warn!(
                    from_x = start.x,
                    from_y = start.y,
                    to_x = centre.x,
                    to_y = centre.y,
                    distance,
                    "start pose off-road; snapped to nearest drivable cell",
                );
                Ok(StartPose::new(centre.x, centre.y, start.heading))
            }
            None => Err(SimulationError::NoDrivableSpawn {
                x: start.x,
                y: start.y,
                radius,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corridor() -> Track {
        let mut track = Track::unpainted(
            200,
            100,
            StartPose::new(20.0, 50.0, 0.0),
            Some(Position::new(180.0, 50.0)),
        )
        .expect("track");
        track.paint_rect(0, 40, 200, 60);
        track
    }

    #[test]
    fn out_of_bounds_is_never_drivable() {
        let track = Track::open_arena();
        assert!(track.is_drivable(0.0, 0.0));
        assert!(track.is_drivable(999.9, 799.9));
        assert!(!track.is_drivable(-0.1, 10.0));
        assert!(!track.is_drivable(10.0, -0.1));
        assert!(!track.is_drivable(1000.0, 10.0));
        assert!(!track.is_drivable(10.0, 800.0));
        assert!(!track.is_drivable(f32::NAN, 10.0));
    }

    #[test]
    fn cell_count_must_match_dimensions() {
        let result = Track::from_cells(4, 4, vec![true; 15], StartPose::default(), None);
        assert!(matches!(result, Err(SimulationError::InvalidConfig(_))));
    }

    #[test]
    fn paint_disc_marks_round_brush() {
        let mut track =
            Track::unpainted(100, 100, StartPose::new(50.0, 50.0, 0.0), None).expect("track");
        track.paint_disc(50.0, 50.0, 10.0);
        assert!(track.is_drivable(50.0, 50.0));
        assert!(track.is_drivable(58.0, 50.0));
        assert!(!track.is_drivable(58.0, 58.0));
        assert!(!track.is_drivable(62.0, 50.0));
    }

    #[test]
    fn paint_stroke_leaves_no_gaps() {
        let mut track =
            Track::unpainted(300, 100, StartPose::new(10.0, 50.0, 0.0), None).expect("track");
        track.paint_stroke(
            &[Position::new(10.0, 50.0), Position::new(290.0, 50.0)],
            5.0,
        );
        for x in 10..290 {
            assert!(track.is_drivable(x as f32, 50.0), "gap at x={x}");
        }
    }

    #[test]
    fn start_from_stroke_faces_direction_of_travel() {
        let points = [
            Position::new(10.0, 10.0),
            Position::new(10.0, 10.0),
            Position::new(10.0, 0.0),
        ];
        let start = Track::start_from_stroke(&points).expect("start");
        assert_eq!(start.position(), Position::new(10.0, 10.0));
        assert!((start.heading - 90.0).abs() < 1e-4, "moving up the screen is 90 degrees");
        assert!(Track::start_from_stroke(&[]).is_none());
    }

    #[test]
    fn drivable_spawn_is_kept() {
        let track = corridor();
        assert_eq!(track.resolve_spawn(10.0), Ok(track.start()));
    }

    #[test]
    fn off_road_spawn_snaps_to_nearest_cell() {
        let mut track = corridor();
        track.set_start(StartPose::new(20.0, 30.0, 45.0));
        let spawn = track.resolve_spawn(15.0).expect("snapped");
        assert!(track.is_drivable(spawn.x, spawn.y));
        assert!((spawn.y - 40.5).abs() < 1e-4);
        assert!((spawn.x - 20.0).abs() <= 0.5 + 1e-4);
        assert_eq!(spawn.heading, 45.0);
    }

    #[test]
    fn unbounded_search_radius_is_capped_by_the_track() {
        let mut track = corridor();
        track.set_start(StartPose::new(20.0, 5.0, 0.0));
        let spawn = track.resolve_spawn(f32::INFINITY).expect("snapped");
        assert!((spawn.y - 40.5).abs() < 1e-4);

        let empty = Track::unpainted(30, 40, StartPose::new(5.0, 5.0, 0.0), None).expect("track");
        assert_eq!(
            empty.resolve_spawn(f32::INFINITY),
            Err(SimulationError::NoDrivableSpawn {
                x: 5.0,
                y: 5.0,
                radius: 50.0
            })
        );
    }

    #[test]
    fn deserialization_checks_cell_count() {
        let track = corridor();
        let json = serde_json::to_string(&track).expect("serialize");
        let restored: Track = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, track);

        let mut value = serde_json::to_value(&track).expect("value");
        value["cells"] = serde_json::json!([true, false, true]);
        let error = serde_json::from_value::<Track>(value).expect_err("short cells");
        assert!(error.to_string().contains("cell count"), "{error}");
    }

    #[test]
    fn unreachable_spawn_is_fatal() {
        let mut track = corridor();
        track.set_start(StartPose::new(20.0, 5.0, 0.0));
        assert_eq!(
            track.resolve_spawn(10.0),
            Err(SimulationError::NoDrivableSpawn {
                x: 20.0,
                y: 5.0,
                radius: 10.0
            })
        );
    }
}
