/// Process exit codes.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const OPERATIONAL_FAILURE: i32 = 1;
    /// Invalid timer transition or registry misuse; nothing was written.
    pub const REJECTED: i32 = 2;
    /// Written, but the log now has ordering problems.
    pub const ORDERING_WARNINGS: i32 = 3;
    pub const NOTHING_MATCHED: i32 = 4;
}
