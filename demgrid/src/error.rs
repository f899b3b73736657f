use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("not an elevation grid file, {0}")]
    Magic(PathBuf),

    #[error("grid file truncated, expected {expected} samples, found {found}")]
    Len { expected: usize, found: usize },

    #[error("sample count {0} does not match {1}x{2}")]
    Shape(usize, usize, usize),

    #[error("grids have different geometry")]
    Geometry,
}
