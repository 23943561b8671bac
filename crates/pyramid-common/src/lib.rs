//! Common types shared by the tile pyramid crates.
//!
//! - [`ImageKey`]: identity of one source image and its storage prefix
//! - [`TileAddress`] and [`LevelPlan`]: r-level arithmetic and tile grids
//! - [`TilePyramidDescriptor`]: the `metadata.json` document published
//!   before any tile
//! - [`GeoPolygon`] / [`BoundingBox`]: geodetic footprint of an image

pub mod descriptor;
pub mod error;
pub mod geometry;
pub mod image_key;
pub mod tile;

pub use descriptor::{pyramid_identifier, TilePyramidDescriptor};
pub use error::{PyramidError, PyramidResult};
pub use geometry::{BoundingBox, GeoPoint, GeoPolygon};
pub use image_key::{ImageKey, COLLECT_TIME_FORMAT};
pub use tile::{
    level_dimension, max_rlevel, tiles_per_axis, LevelPlan, LevelShape, PixelRect, TileAddress,
    DEFAULT_TILE_SIZE,
};
