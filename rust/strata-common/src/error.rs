use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    pub fn size_limit_exceeded(requested: usize, maximum: usize) -> Error {
        Error(ErrorKind::SizeLimitExceeded { requested, maximum }.into())
    }

    pub fn out_of_memory(requested: usize) -> Error {
        Error(ErrorKind::OutOfMemory { requested }.into())
    }

    /// Returns `true` if the error signals backend exhaustion.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self.kind(), ErrorKind::OutOfMemory { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error(
        "requested allocation size of {requested} is out of range - \
         maximum allocation size is {maximum}"
    )]
    SizeLimitExceeded { requested: usize, maximum: usize },

    #[error("out of memory: failed to allocate {requested} bytes")]
    OutOfMemory { requested: usize },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_boxed() {
        assert_eq!(std::mem::size_of::<Error>(), std::mem::size_of::<usize>());
    }

    #[test]
    fn test_size_limit_message() {
        let err = Error::size_limit_exceeded(10, 5);
        assert_eq!(
            err.to_string(),
            "requested allocation size of 10 is out of range - maximum allocation size is 5"
        );
        assert!(matches!(
            err.into_kind(),
            ErrorKind::SizeLimitExceeded {
                requested: 10,
                maximum: 5
            }
        ));
    }

    #[test]
    fn test_out_of_memory() {
        let err = Error::out_of_memory(1024);
        assert!(err.is_out_of_memory());
        assert!(!Error::invalid_operation("x").is_out_of_memory());
    }
}
