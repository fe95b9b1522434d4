use crate::{GroupKind, ObjectSource};

/// Resolution failures carried inside the IR.
///
/// These are produced while resolving references and are surfaced as status conditions on the
/// object that holds the reference. They never abort translation of sibling objects.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("backend {0} not found")]
    BackendNotFound(ObjectSource),

    #[error("unsupported backend kind {0}")]
    InvalidBackendKind(GroupKind),

    #[error("reference to {0} is not permitted")]
    RefNotPermitted(ObjectSource),

    #[error("secret {0} not found")]
    SecretNotFound(ObjectSource),

    #[error("invalid certificate in {secret}: {reason}")]
    InvalidCertificate {
        secret: ObjectSource,
        reason: String,
    },

    #[error("{0}")]
    Policy(String),
}

impl Error {
    /// The Gateway API condition reason that describes this error.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::BackendNotFound(_) => "BackendNotFound",
            Self::InvalidBackendKind(_) => "InvalidKind",
            Self::RefNotPermitted(_) => "RefNotPermitted",
            Self::SecretNotFound(_) | Self::InvalidCertificate { .. } => "InvalidCertificateRef",
            Self::Policy(_) => "Invalid",
        }
    }
}
