use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptError {
    #[error("no POP has a positive capacity outgoing link")]
    NoPopCapacity,

    #[error("no demand-connected site has a positive capacity incoming link")]
    NoDemandCapacity,

    #[error("{0}")]
    Infeasible(String),

    #[error("solver failure: {0}")]
    Solver(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Topology(#[from] meshtopo::TopoError),
}
