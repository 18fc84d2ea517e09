use applygate_core::{ApiError, Origin};

#[derive(Debug)]
pub enum DispatchError {
    /// Connection or channel level failure.
    Broker(lapin::Error),

    /// The broker did not ack the publish within the confirm timeout.
    ConfirmTimeout,

    /// The broker negatively acknowledged the publish.
    Nacked,

    /// All publish attempts exhausted.
    RetriesExhausted { attempts: u32 },

    /// The in-flight publish window stayed full past the bounded wait.
    Backpressure,

    /// Frame could not be decoded.
    Codec(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Broker(err) => write!(f, "broker error: {err}"),
            DispatchError::ConfirmTimeout => write!(f, "publisher confirm timed out"),
            DispatchError::Nacked => write!(f, "publish negatively acknowledged"),
            DispatchError::RetriesExhausted { attempts } => {
                write!(f, "publish failed after {attempts} attempts")
            }
            DispatchError::Backpressure => write!(f, "publish window full"),
            DispatchError::Codec(msg) => write!(f, "frame codec error: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Broker(err) => Some(err),
            _ => None,
        }
    }
}

impl From<lapin::Error> for DispatchError {
    fn from(err: lapin::Error) -> Self {
        DispatchError::Broker(err)
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Backpressure => ApiError::dependency(Origin::Broker, err),
            err => ApiError::dispatch(err.to_string()),
        }
    }
}
