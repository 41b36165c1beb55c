use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all possible error conditions that can occur during snapshot file parsing
/// and heap analysis. Each variant provides specific context about the failure mode to enable
/// appropriate error handling.
///
/// Note that address lookups that miss are *not* errors: every index query in this crate
/// returns [`Option`] because a pointer into uncaptured memory is a routine outcome of
/// analyzing a heap snapshot. Likewise, a type whose declared field layout cannot be honored
/// against the captured bytes is reported through the
/// [`Diagnostics`](crate::snapshot::Diagnostics) sink rather than raised per instance.
///
/// # Error Categories
///
/// ## Snapshot File Errors
/// - [`Error::Malformed`] - Corrupted or invalid snapshot container structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond buffer boundaries
/// - [`Error::NotSupported`] - Unsupported container version or feature
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and Runtime Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::LockError`] - Thread synchronization failure in the job queue
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::{Error, snapshot::RawSnapshot};
/// use std::path::Path;
///
/// match RawSnapshot::from_file(Path::new("capture.heap")) {
///     Ok(raw) => {
///         println!("Successfully loaded snapshot");
///     }
///     Err(Error::NotSupported) => {
///         eprintln!("Snapshot container version is not supported");
///     }
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed snapshot: {} ({}:{})", message, file, line);
///     }
///     Err(e) => {
///         eprintln!("Other error: {}", e);
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The snapshot file is damaged and could not be parsed.
    ///
    /// This error indicates that the container structure is corrupted or doesn't
    /// conform to the expected snapshot format. The error includes the source
    /// location where the malformation was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    ///
    /// This error occurs when trying to read data beyond the end of the
    /// snapshot buffer. It's a safety check to prevent buffer overruns when
    /// a capture is truncated.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This snapshot version is not supported.
    ///
    /// Indicates that the input file is not a supported snapshot container,
    /// or uses a format version that is not yet implemented in this library.
    #[error("This snapshot version is not supported")]
    NotSupported,

    /// Provided input was empty.
    ///
    /// This error occurs when an empty file or buffer is provided where
    /// actual snapshot data was expected.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur during file operations
    /// such as reading from disk, permission issues, or filesystem errors.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    ///
    /// Used for errors that don't fit into other categories, such as a
    /// failed memory mapping.
    #[error("{0}")]
    Error(String),

    /// Failed to lock target.
    ///
    /// This error occurs when thread synchronization fails, typically when
    /// the analysis job queue's mutex was poisoned by a panicking job.
    #[error("Failed to lock target")]
    LockError,
}
