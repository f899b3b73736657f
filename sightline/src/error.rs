use thiserror::Error;

#[derive(Error, Debug)]
pub enum SightlineError {
    #[error("LOS confidence threshold {0} is not within [0, 1]")]
    Threshold(f64),

    #[error("LOS distance range [{0}, {1}] is empty")]
    DistanceRange(f64, f64),

    #[error("failed to build LOS worker pool: {0}")]
    WorkerPool(String),
}
