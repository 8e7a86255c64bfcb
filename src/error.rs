use thiserror::Error as ThisError;

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    #[error("{0}")]
    Malformed(&'static str),
    #[error("{0}")]
    Validation(&'static str),
    #[error("{0}")]
    Limit(&'static str),
    #[error("{0} support is disabled")]
    Feature(&'static str),
    #[error("{msg}: {detail}")]
    Link { msg: &'static str, detail: String },
    #[error("detected a cycle in the import dependencies: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}

impl Error {
    /// The static message, without link detail or cycle chain.
    pub fn message(&self) -> &'static str {
        match self {
            Error::Malformed(s) | Error::Validation(s) | Error::Limit(s) | Error::Feature(s) => s,
            Error::Link { msg, .. } => msg,
            Error::CyclicDependency(_) => crate::error_msg::CYCLIC_DEPENDENCY,
        }
    }
}

#[inline]
pub fn malformed<T>(msg: &'static str) -> Result<T, Error> { Err(Error::Malformed(msg)) }
#[inline]
pub fn validation<T>(msg: &'static str) -> Result<T, Error> { Err(Error::Validation(msg)) }
#[inline]
pub fn limit<T>(msg: &'static str) -> Result<T, Error> { Err(Error::Limit(msg)) }
#[inline]
pub fn disabled<T>(feature: &'static str) -> Result<T, Error> { Err(Error::Feature(feature)) }
#[inline]
pub fn link<T>(msg: &'static str, detail: impl Into<String>) -> Result<T, Error> {
    Err(Error::Link { msg, detail: detail.into() })
}
