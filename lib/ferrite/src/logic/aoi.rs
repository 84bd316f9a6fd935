use hashbrown::HashMap;
use indexmap::IndexSet;

use crate::logic::object::Sn;

/// Appear/disappear sets produced by one cell transition. Both directions
/// of the same transition are derived from one delta, so the notifications
/// are symmetric by construction.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct AoiDelta {
    pub appeared: Vec<Sn>,
    pub disappeared: Vec<Sn>,
}

/// Grid based area-of-interest over a rectangular world region.
///
/// The region is split into uniform square cells; an object belongs to
/// exactly one cell and "sees" the occupants of the nine cells around it.
/// An object only migrates to a new cell when its position leaves the
/// committed cell's rectangle enlarged by the hysteresis band, which stops
/// boundary flapping.
///
/// The grid is owned by a scene and only mutated from the scene's logic
/// thread; it is a pure structure returning deltas, the scene routes them.
pub struct AoiGrid {
    min_x: f32,
    min_z: f32,
    cell_size: f32,
    hysteresis: f32,
    rows: usize,
    cols: usize,
    cells: Vec<IndexSet<Sn>>,
    index: HashMap<Sn, (usize, usize)>,
}

impl AoiGrid {
    pub fn new(
        min_x: f32,
        min_z: f32,
        max_x: f32,
        max_z: f32,
        cell_size: f32,
        hysteresis: f32,
    ) -> AoiGrid {
        assert!(cell_size > 0.0, "Cell size must be positive");
        assert!(
            hysteresis >= 0.0 && hysteresis < cell_size / 2.0,
            "Hysteresis must stay below half a cell"
        );
        assert!(max_x > min_x && max_z > min_z, "Degenerate world rectangle");

        let cols = (((max_x - min_x) / cell_size).ceil() as usize).max(1);
        let rows = (((max_z - min_z) / cell_size).ceil() as usize).max(1);

        AoiGrid {
            min_x,
            min_z,
            cell_size,
            hysteresis,
            rows,
            cols,
            cells: (0..rows * cols).map(|_| IndexSet::new()).collect(),
            index: HashMap::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn contains(&self, sn: Sn) -> bool {
        self.index.contains_key(&sn)
    }

    /// Inserts an object at a position. Returns the adjacent occupants the
    /// object now sees (and that now see it).
    pub fn insert(&mut self, sn: Sn, x: f32, z: f32) -> Vec<Sn> {
        assert!(x.is_finite() && z.is_finite(), "AOI position must be finite");

        if self.index.contains_key(&sn) {
            return Vec::new();
        }

        let (row, col) = self.locate(x, z);
        let nearby = self.collect_adjacent(row, col, sn);

        let idx = self.cell_index(row, col);
        self.cells[idx].insert(sn);
        self.index.insert(sn, (row, col));

        nearby
    }

    /// Removes an object. Returns the adjacent occupants that no longer
    /// see it.
    pub fn remove(&mut self, sn: Sn) -> Vec<Sn> {
        let (row, col) = match self.index.remove(&sn) {
            Some(cell) => cell,
            None => return Vec::new(),
        };

        let idx = self.cell_index(row, col);
        self.cells[idx].swap_remove(&sn);

        self.collect_adjacent(row, col, sn)
    }

    /// Updates an object's position, migrating it between cells when the
    /// hysteresis band is crossed. Returns the appear/disappear delta of
    /// the transition, or `None` when no cell change happened.
    pub fn update(&mut self, sn: Sn, x: f32, z: f32) -> Option<AoiDelta> {
        assert!(x.is_finite() && z.is_finite(), "AOI position must be finite");

        let (old_row, old_col) = *self.index.get(&sn)?;

        // The committed cell's rectangle, enlarged by the hysteresis band.
        let cell_min_x = self.min_x + old_col as f32 * self.cell_size;
        let cell_max_x = cell_min_x + self.cell_size;
        let cell_min_z = self.min_z + old_row as f32 * self.cell_size;
        let cell_max_z = cell_min_z + self.cell_size;

        let outside = x < cell_min_x - self.hysteresis
            || x >= cell_max_x + self.hysteresis
            || z < cell_min_z - self.hysteresis
            || z >= cell_max_z + self.hysteresis;

        if !outside {
            return None;
        }

        let (new_row, new_col) = self.locate(x, z);
        if new_row == old_row && new_col == old_col {
            return None;
        }

        let old_adjacent = self.collect_adjacent_set(old_row, old_col, sn);

        let old_idx = self.cell_index(old_row, old_col);
        self.cells[old_idx].swap_remove(&sn);
        let new_idx = self.cell_index(new_row, new_col);
        self.cells[new_idx].insert(sn);
        self.index.insert(sn, (new_row, new_col));

        let new_adjacent = self.collect_adjacent_set(new_row, new_col, sn);

        let appeared: Vec<Sn> = new_adjacent
            .iter()
            .filter(|other| !old_adjacent.contains(*other))
            .cloned()
            .collect();
        let disappeared: Vec<Sn> = old_adjacent
            .iter()
            .filter(|other| !new_adjacent.contains(*other))
            .cloned()
            .collect();

        Some(AoiDelta { appeared, disappeared })
    }

    /// Occupants of the nine cells around a position, excluding `exclude`.
    pub fn nearby(&self, x: f32, z: f32, exclude: Sn) -> Vec<Sn> {
        let (row, col) = self.locate(x, z);
        self.collect_adjacent(row, col, exclude)
    }

    /// Positions outside the world rectangle clamp to the boundary cell.
    fn locate(&self, x: f32, z: f32) -> (usize, usize) {
        let col = ((x - self.min_x) / self.cell_size).floor() as i64;
        let row = ((z - self.min_z) / self.cell_size).floor() as i64;

        let col = col.max(0).min(self.cols as i64 - 1) as usize;
        let row = row.max(0).min(self.rows as i64 - 1) as usize;

        (row, col)
    }

    #[inline]
    fn cell_index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    fn collect_adjacent(&self, row: usize, col: usize, exclude: Sn) -> Vec<Sn> {
        let mut result = Vec::new();
        self.for_each_adjacent(row, col, |cell| {
            for &sn in cell.iter() {
                if sn != exclude {
                    result.push(sn);
                }
            }
        });
        result
    }

    fn collect_adjacent_set(&self, row: usize, col: usize, exclude: Sn) -> IndexSet<Sn> {
        let mut result = IndexSet::new();
        self.for_each_adjacent(row, col, |cell| {
            for &sn in cell.iter() {
                if sn != exclude {
                    result.insert(sn);
                }
            }
        });
        result
    }

    fn for_each_adjacent<F: FnMut(&IndexSet<Sn>)>(&self, row: usize, col: usize, mut visit: F) {
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                let r = row as i64 + dr;
                let c = col as i64 + dc;
                if r < 0 || r >= self.rows as i64 || c < 0 || c >= self.cols as i64 {
                    continue;
                }
                visit(&self.cells[self.cell_index(r as usize, c as usize)]);
            }
        }
    }
}
