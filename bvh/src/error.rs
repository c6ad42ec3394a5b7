use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid build settings: {0}")]
    InvalidSettings(String),
    #[error("out of memory while requesting {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("could not create build thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("structure is immutable, its builder was released")]
    Immutable,
    #[error("geometry {geom_id} disappeared during the build")]
    MissingGeometry { geom_id: u32 },
}
