//! North-up raster elevation grids (`.egr` files).
//!
//! An `.egr` file is a flat little-endian raster: a 36-byte header (magic
//! `EGR1`, columns, rows, top-left sample center, cell size) followed by
//! row-major `f32` samples starting at the northernmost row.

mod error;

pub use crate::error::GridError;
use byteorder::{LittleEndian as LE, ReadBytesExt};
use geo_types::Coord;
use memmap2::Mmap;
use std::{
    fs::File,
    io::{BufReader, Read},
    mem::size_of,
    path::Path,
};

const MAGIC: [u8; 4] = *b"EGR1";
const HEADER_LEN: usize = 36;

/// A north-up surface elevation raster.
///
/// `(0, 0)` indexes the northwest sample; x grows east, y grows south.
/// Coordinates are in projected meters and refer to sample centers.
pub struct Grid {
    /// Center of the northwest-most sample.
    left_top: Coord<f64>,

    /// Meters per sample, square cells.
    cell_size: f64,

    /// Number of (columns, rows) in this grid.
    dimensions: (usize, usize),

    /// Lowest elevation sample in this grid.
    min_elev: f32,

    /// Highest elevation sample in this grid.
    max_elev: f32,

    /// Elevation samples.
    samples: Storage,
}

enum Storage {
    Parsed(Box<[f32]>),
    Mapped(Mmap),
}

impl Storage {
    fn get_unchecked(&self, index: usize) -> f32 {
        match self {
            Storage::Parsed(samples) => samples[index],
            Storage::Mapped(raw) => {
                let start = HEADER_LEN + index * size_of::<f32>();
                let end = start + size_of::<f32>();
                let bytes = &mut &raw.as_ref()[start..end];
                bytes.read_f32::<LE>().unwrap()
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Storage::Parsed(samples) => samples.len(),
            Storage::Mapped(raw) => (raw.as_ref().len() - HEADER_LEN) / size_of::<f32>(),
        }
    }

    fn min_max(&self) -> (f32, f32) {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for index in 0..self.len() {
            let sample = self.get_unchecked(index);
            min = min.min(sample);
            max = max.max(sample);
        }
        (min, max)
    }
}

struct Header {
    cols: usize,
    rows: usize,
    left_top: Coord<f64>,
    cell_size: f64,
}

fn parse_header<R: Read, P: AsRef<Path>>(rdr: &mut R, path: P) -> Result<Header, GridError> {
    let mut magic = [0u8; 4];
    rdr.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(GridError::Magic(path.as_ref().to_owned()));
    }
    let cols = rdr.read_u32::<LE>()? as usize;
    let rows = rdr.read_u32::<LE>()? as usize;
    let x = rdr.read_f64::<LE>()?;
    let y = rdr.read_f64::<LE>()?;
    let cell_size = rdr.read_f64::<LE>()?;
    Ok(Header {
        cols,
        rows,
        left_top: Coord { x, y },
        cell_size,
    })
}

impl Grid {
    /// Returns Self parsed from the file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GridError> {
        let mut file = BufReader::new(File::open(&path)?);
        let header = parse_header(&mut file, &path)?;

        let samples = {
            let mut samples = Vec::with_capacity(header.cols * header.rows);
            for _ in 0..(header.cols * header.rows) {
                match file.read_f32::<LE>() {
                    Ok(sample) => samples.push(sample),
                    Err(_) => {
                        return Err(GridError::Len {
                            expected: header.cols * header.rows,
                            found: samples.len(),
                        })
                    }
                }
            }
            Storage::Parsed(samples.into_boxed_slice())
        };

        Self::from_storage(header, samples)
    }

    /// Returns Self using the memory-mapped file as storage.
    pub fn memmap<P: AsRef<Path>>(path: P) -> Result<Self, GridError> {
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let header = parse_header(&mut &mmap.as_ref()[..], &path)?;
        let expected = header.cols * header.rows;
        let found = (mmap.as_ref().len().saturating_sub(HEADER_LEN)) / size_of::<f32>();
        if found < expected {
            return Err(GridError::Len { expected, found });
        }
        Self::from_storage(header, Storage::Mapped(mmap))
    }

    /// Returns Self backed by `samples`, row-major from the north row.
    pub fn from_samples(
        left_top: Coord<f64>,
        cell_size: f64,
        cols: usize,
        rows: usize,
        samples: Vec<f32>,
    ) -> Result<Self, GridError> {
        if samples.len() != cols * rows {
            return Err(GridError::Shape(samples.len(), cols, rows));
        }
        Self::from_storage(
            Header {
                cols,
                rows,
                left_top,
                cell_size,
            },
            Storage::Parsed(samples.into_boxed_slice()),
        )
    }

    fn from_storage(header: Header, samples: Storage) -> Result<Self, GridError> {
        let (min_elev, max_elev) = samples.min_max();
        Ok(Self {
            left_top: header.left_top,
            cell_size: header.cell_size,
            dimensions: (header.cols, header.rows),
            min_elev,
            max_elev,
            samples,
        })
    }

    /// Returns the number of (columns, rows).
    pub fn dimensions(&self) -> (usize, usize) {
        self.dimensions
    }

    /// Returns meters per sample.
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Returns the center of the northwest-most sample.
    pub fn left_top(&self) -> Coord<f64> {
        self.left_top
    }

    /// Returns the lowest elevation sample in this grid.
    pub fn min_elev(&self) -> f32 {
        self.min_elev
    }

    /// Returns the highest elevation sample in this grid.
    pub fn max_elev(&self) -> f32 {
        self.max_elev
    }

    /// Returns the center coordinate of the cell at `(ix, iy)`.
    pub fn idx_to_coord(&self, (ix, iy): (usize, usize)) -> Coord<f64> {
        Coord {
            x: self.left_top.x + self.cell_size * ix as f64,
            y: self.left_top.y - self.cell_size * iy as f64,
        }
    }

    /// Returns the index of the cell containing `coord`, clamped to the
    /// grid extent.
    pub fn coord_to_idx(&self, coord: Coord<f64>) -> (usize, usize) {
        let ix = ((coord.x - self.left_top.x) / self.cell_size).round();
        let iy = ((self.left_top.y - coord.y) / self.cell_size).round();
        let ix = (ix.max(0.0) as usize).min(self.dimensions.0 - 1);
        let iy = (iy.max(0.0) as usize).min(self.dimensions.1 - 1);
        (ix, iy)
    }

    /// Returns the sample nearest `coord`, or None outside the grid.
    pub fn value(&self, coord: Coord<f64>) -> Option<f32> {
        let ix = ((coord.x - self.left_top.x) / self.cell_size).round();
        let iy = ((self.left_top.y - coord.y) / self.cell_size).round();
        if ix < 0.0 || iy < 0.0 {
            return None;
        }
        let (ix, iy) = (ix as usize, iy as usize);
        if ix < self.dimensions.0 && iy < self.dimensions.1 {
            Some(self.samples.get_unchecked(self.xy_to_linear_index((ix, iy))))
        } else {
            None
        }
    }

    /// Returns the sample nearest `coord`, clamping to the grid extent.
    pub fn value_clamped(&self, coord: Coord<f64>) -> f32 {
        let idx = self.coord_to_idx(coord);
        self.samples.get_unchecked(self.xy_to_linear_index(idx))
    }

    /// Returns a lazy scanline iterator over the cell centers inside the
    /// axis-aligned box spanned by `a` and `b`, clamped to the grid.
    ///
    /// Cells are visited west to east within each row, north rows first,
    /// so the order is deterministic for a fixed grid.
    pub fn cells_within(&self, a: Coord<f64>, b: Coord<f64>) -> Cells<'_> {
        let (min_x, max_x) = if a.x <= b.x { (a.x, b.x) } else { (b.x, a.x) };
        let (min_y, max_y) = if a.y <= b.y { (a.y, b.y) } else { (b.y, a.y) };
        let (min_ix, min_iy) = self.coord_to_idx(Coord { x: min_x, y: max_y });
        let (max_ix, max_iy) = self.coord_to_idx(Coord { x: max_x, y: min_y });
        Cells {
            grid: self,
            min_ix,
            max_ix,
            ix: min_ix,
            iy: min_iy,
            max_iy,
        }
    }

    /// Adds `other` sample-wise; both grids must share geometry.
    ///
    /// Used to compose a surface model from terrain plus height rasters.
    pub fn add(&self, other: &Grid) -> Result<Grid, GridError> {
        self.combine(other, |a, b| a + b)
    }

    /// Subtracts `other` sample-wise; both grids must share geometry.
    pub fn sub(&self, other: &Grid) -> Result<Grid, GridError> {
        self.combine(other, |a, b| a - b)
    }

    fn combine(&self, other: &Grid, op: impl Fn(f32, f32) -> f32) -> Result<Grid, GridError> {
        if !self.same_geometry(other) {
            return Err(GridError::Geometry);
        }
        let (cols, rows) = self.dimensions;
        let samples = (0..cols * rows)
            .map(|i| op(self.samples.get_unchecked(i), other.samples.get_unchecked(i)))
            .collect();
        Grid::from_samples(self.left_top, self.cell_size, cols, rows, samples)
    }

    fn same_geometry(&self, other: &Grid) -> bool {
        self.dimensions == other.dimensions
            && self.left_top == other.left_top
            && self.cell_size == other.cell_size
    }
}

/// Private API.
impl Grid {
    fn xy_to_linear_index(&self, (x, y): (usize, usize)) -> usize {
        self.dimensions.0 * y + x
    }
}

/// A cell-center surface sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSurface {
    pub x: f64,
    pub y: f64,
    pub elevation: f64,
}

/// Iterator returned by [`Grid::cells_within`].
pub struct Cells<'a> {
    grid: &'a Grid,
    min_ix: usize,
    max_ix: usize,
    ix: usize,
    iy: usize,
    max_iy: usize,
}

impl<'a> Iterator for Cells<'a> {
    type Item = CellSurface;

    fn next(&mut self) -> Option<CellSurface> {
        if self.iy > self.max_iy {
            return None;
        }
        let (ix, iy) = (self.ix, self.iy);
        if self.ix == self.max_ix {
            self.ix = self.min_ix;
            self.iy += 1;
        } else {
            self.ix += 1;
        }
        let center = self.grid.idx_to_coord((ix, iy));
        let elevation = self
            .grid
            .samples
            .get_unchecked(self.grid.xy_to_linear_index((ix, iy)));
        Some(CellSurface {
            x: center.x,
            y: center.y,
            elevation: f64::from(elevation),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Coord, Grid};

    fn flat_grid(cols: usize, rows: usize, elev: f32) -> Grid {
        Grid::from_samples(
            Coord { x: 0.0, y: 100.0 },
            1.0,
            cols,
            rows,
            vec![elev; cols * rows],
        )
        .unwrap()
    }

    #[test]
    fn test_index_round_trip() {
        let grid = flat_grid(11, 7, 3.0);
        for iy in 0..7 {
            for ix in 0..11 {
                let center = grid.idx_to_coord((ix, iy));
                assert_eq!(grid.coord_to_idx(center), (ix, iy));
            }
        }
    }

    #[test]
    fn test_value_out_of_range() {
        let grid = flat_grid(4, 4, 1.5);
        assert_eq!(grid.value(Coord { x: 1.0, y: 99.0 }), Some(1.5));
        assert_eq!(grid.value(Coord { x: -10.0, y: 99.0 }), None);
        assert_eq!(grid.value(Coord { x: 1.0, y: 300.0 }), None);
        assert_eq!(grid.value_clamped(Coord { x: -10.0, y: 99.0 }), 1.5);
    }

    #[test]
    fn test_cells_within_scanline_order() {
        let mut samples = Vec::new();
        for iy in 0..5 {
            for ix in 0..5 {
                samples.push((iy * 5 + ix) as f32);
            }
        }
        let grid = Grid::from_samples(Coord { x: 0.0, y: 100.0 }, 1.0, 5, 5, samples).unwrap();
        let cells: Vec<_> = grid
            .cells_within(Coord { x: 1.0, y: 98.0 }, Coord { x: 3.0, y: 99.0 })
            .collect();
        assert_eq!(cells.len(), 6);
        // North row first, west to east.
        assert_eq!(cells[0].x, 1.0);
        assert_eq!(cells[0].y, 99.0);
        assert_eq!(cells[0].elevation, 6.0);
        assert_eq!(cells[5].x, 3.0);
        assert_eq!(cells[5].y, 98.0);
        assert_eq!(cells[5].elevation, 13.0);
    }

    #[test]
    fn test_cells_within_clamps_to_extent() {
        let grid = flat_grid(3, 3, 0.0);
        let cells: Vec<_> = grid
            .cells_within(Coord { x: -50.0, y: 300.0 }, Coord { x: 50.0, y: -50.0 })
            .collect();
        assert_eq!(cells.len(), 9);
    }

    #[test]
    fn test_add_and_geometry_mismatch() {
        let terrain = flat_grid(4, 4, 10.0);
        let heights = flat_grid(4, 4, 2.5);
        let surface = terrain.add(&heights).unwrap();
        assert_eq!(surface.value(Coord { x: 2.0, y: 98.0 }), Some(12.5));
        assert_eq!(surface.max_elev(), 12.5);

        let other = flat_grid(5, 4, 2.5);
        assert!(terrain.add(&other).is_err());
    }

    #[test]
    fn test_min_max_elev() {
        let mut samples = vec![0.0f32; 9];
        samples[4] = 8.0;
        samples[8] = -3.0;
        let grid = Grid::from_samples(Coord { x: 0.0, y: 10.0 }, 1.0, 3, 3, samples).unwrap();
        assert_eq!(grid.min_elev(), -3.0);
        assert_eq!(grid.max_elev(), 8.0);
    }
}
