pub mod background;
pub mod capture;
pub mod compositor;
pub mod error;
pub mod geometry;
pub mod output;
pub mod pipeline;
pub mod segmentation;
