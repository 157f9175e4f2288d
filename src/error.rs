//! Unified kernel error type
//!
//! KernelError uses `#[repr(i32)]` with discriminants equal to errno values.
//! This eliminates all error translation - the discriminant IS the errno.

/// Kernel error type with errno values as discriminants
///
/// Each variant's value is its errno. This allows zero-cost conversion
/// to syscall return values via simple negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum KernelError {
    /// No such file or directory (ENOENT)
    NotFound = 2,
    /// No such process (ESRCH)
    NoProcess = 3,
    /// Bad file descriptor (EBADF)
    BadHandle = 9,
    /// Out of memory (ENOMEM)
    OutOfMemory = 12,
    /// Permission denied (EACCES)
    PermissionDenied = 13,
    /// Device or resource busy (EBUSY)
    Busy = 16,
    /// File exists (EEXIST)
    AlreadyExists = 17,
    /// Not a directory (ENOTDIR)
    NotDirectory = 20,
    /// Is a directory (EISDIR)
    IsDirectory = 21,
    /// Invalid argument (EINVAL)
    InvalidArgument = 22,
    /// Too many open files (EMFILE)
    ProcessFileLimit = 24,
    /// Directory not empty (ENOTEMPTY)
    DirectoryNotEmpty = 39,
}

impl KernelError {
    /// Return negative errno for syscall return (i64)
    ///
    /// Example: `KernelError::BadHandle.sysret()` returns -9
    #[inline]
    pub const fn sysret(self) -> i64 {
        -(self as i32 as i64)
    }

    /// Get the positive errno value
    #[inline]
    pub const fn errno(self) -> i32 {
        self as i32
    }
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;
