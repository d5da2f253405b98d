use crate::k8s::relay::object::VersionMarker;
use derive_more::From;
use k8s_openapi::serde_json;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Kube(kube::Error),

    #[from]
    Infer(kube::config::InferConfigError),

    #[from]
    Kubeconfig(kube::config::KubeconfigError),

    #[from]
    HttpHeader(hyper::http::Error),

    #[from]
    Io(std::io::Error),

    /// The cluster no longer retains history back to the requested marker
    VersionExpired,

    /// A watch notification arrived with a marker that does not advance the mirror
    StaleVersion {
        current: VersionMarker,
        received: VersionMarker,
    },

    /// An object or listing from the API server could not be interpreted
    Malformed(String),

    /// No pipeline is running for the requested workload kind
    UnknownKind(String),

    /// A lock was poisoned by a panic on another task
    LockPoisoned(String),

    /// Custom error message
    Custom(String),
}

impl Error {
    /// True when the error means the requested version marker can no longer be resumed from
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        match self {
            Self::VersionExpired => true,
            Self::Kube(kube::Error::Api(response)) => response.code == 410,
            _ => false,
        }
    }

    /// True when a single item from the API server could not be decoded or interpreted
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::Json(_) | Self::Malformed(_) | Self::Kube(kube::Error::SerdeError(_))
        )
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl std::error::Error for Error {}
