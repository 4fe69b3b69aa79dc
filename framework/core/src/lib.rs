mod credential;
mod error;
mod outcome;
mod shutdown;

pub mod prelude {
    pub use crate::credential::Credential;
    pub use crate::error::{FailureKind, SessionError};
    pub use crate::outcome::RequestOutcome;
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle};
}
