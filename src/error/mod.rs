#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mismatched point count: {0} has {1} points, but {2} are expected")]
    MismatchedPointCount(String, usize, usize),

    #[error("Mismatched image size: {0:?} should be {1:?}")]
    MismatchedImageSize(Vec<usize>, Vec<usize>),

    #[error("Missing initial points: seed points or bounds for random initialization are required")]
    MissingInitialPoints,

    #[error("Missing statistics: {0}")]
    MissingStatistics(String),

    #[error("Record Error: {0}")]
    Record(String),

    #[error("Tensor data Error: {0}")]
    TensorData(String),

    #[error("Unknown background mode: {0:?}")]
    UnknownBackgroundMode(String),

    #[error("Unknown rasterize mode: {0:?}")]
    UnknownRasterizeMode(String),

    #[error("Validation Error: {0} should be {1}")]
    Validation(String, String),
}
