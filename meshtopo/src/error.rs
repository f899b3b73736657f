use thiserror::Error;

#[derive(Error, Debug)]
pub enum TopoError {
    #[error("site {0} references unknown device SKU '{1}'")]
    UnknownDevice(String, String),

    #[error("CN device '{0}' must have exactly one node per site")]
    CnNodeCount(String),

    #[error("no devices of type {0} are configured")]
    NoDevices(&'static str),

    #[error("duplicate site at the same location with type {0} and device '{1}'")]
    DuplicateSite(String, String),

    #[error("link {0} references unknown site {1}")]
    DanglingLink(String, String),

    #[error("no demand sites were added to the topology")]
    NoDemand,

    #[error("{0}")]
    Sightline(#[from] sightline::SightlineError),
}
