use tde_core::ErrorKind;
use thiserror::Error;

/// Errors returned synchronously by the job manager.
///
/// Failures *inside* a job never surface here; they are reported through the
/// manager's failure sink as a [`JobFailure`].
#[derive(Debug, Error)]
pub enum JobError {
    /// The call was malformed, e.g. an empty job or a zero group size.
    #[error("invalid arguments: {0}")]
    InvalidArgs(&'static str),
    /// A worker thread could not be started.
    #[error("failed to spawn job thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
    /// The manager configuration could not be parsed or is unusable.
    #[error("invalid job manager configuration: {0}")]
    Config(String),
    /// The manager no longer accepts jobs.
    #[error("job manager is shutting down")]
    ShuttingDown,
}

impl JobError {
    /// Maps this error onto the engine-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgs(_) | Self::Config(_) => ErrorKind::InvalidArgs,
            Self::ThreadSpawn(_) | Self::ShuttingDown => ErrorKind::Fail,
        }
    }
}

impl From<toml::de::Error> for JobError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// A job that panicked while running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub job_name: String,
    pub message: String,
}

impl JobFailure {
    pub(crate) fn from_panic(job_name: &str, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self {
            job_name: job_name.to_owned(),
            message,
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job '{}' panicked: {}", self.job_name, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(JobError::InvalidArgs("empty job").kind(), ErrorKind::InvalidArgs);
        let spawn = JobError::ThreadSpawn(std::io::Error::other("no threads"));
        assert_eq!(spawn.kind(), ErrorKind::Fail);
    }

    #[test]
    fn test_failure_from_panic_payloads() {
        let failure = JobFailure::from_panic("physics", Box::new("boom"));
        assert_eq!(failure.to_string(), "job 'physics' panicked: boom");

        let failure = JobFailure::from_panic("audio", Box::new(String::from("bad sample")));
        assert_eq!(failure.message, "bad sample");

        let failure = JobFailure::from_panic("ai", Box::new(42u32));
        assert_eq!(failure.message, "non-string panic payload");
    }
}
