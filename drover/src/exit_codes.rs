#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Runs finished, including runs that failed their thresholds.
    Success = 0,

    /// Unrecoverable engine error: missing scenario file, bad flags, fatal
    /// internal failure.
    EngineError = 1,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
