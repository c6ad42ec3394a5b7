pub mod generators;
pub mod mesh;
pub mod scene;

pub use generators::*;
pub use mesh::*;
pub use scene::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("index {index} out of range for {count} vertices")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("no object at slot {0}")]
    NoSuchObject(usize),
}
