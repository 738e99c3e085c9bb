//! Process-level error type.
//!
//! Every fallible pipeline step returns `AppError`. The exit code travels with the
//! message so `main` can map failures onto a stable process status:
//!
//! - `2`: invalid input, configuration or I/O failure
//! - `3`: no usable data (every mission skipped, every row unlabeled, ...)
//! - `4`: training or artifact failure (fit errors, artifact not found, ...)

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    /// Invalid input, configuration or I/O failure.
    pub fn input(message: impl Into<String>) -> Self {
        Self::new(2, message)
    }

    /// Nothing usable left to work with.
    pub fn no_data(message: impl Into<String>) -> Self {
        Self::new(3, message)
    }

    /// Training, evaluation or artifact failure.
    pub fn training(message: impl Into<String>) -> Self {
        Self::new(4, message)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
