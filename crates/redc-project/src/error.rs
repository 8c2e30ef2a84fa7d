//! Error types for project persistence.

use std::path::PathBuf;

use snafu::Snafu;

/// Result type for project store operations.
pub type Result<T> = std::result::Result<T, ProjectError>;

/// Errors from [`crate::CaseStore`] implementations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProjectError {
    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// No project record exists under this name.
    #[snafu(display("project '{name}' not found"))]
    ProjectNotFound {
        /// Project name.
        name: String,
    },

    /// The project belongs to another user.
    #[snafu(display("user '{user}' may not access project '{project}'"))]
    AccessDenied {
        /// Requesting user.
        user: String,
        /// Project name.
        project: String,
    },

    /// No case matches the identifier.
    #[snafu(display("no case with id or name '{identifier}' in project {project}"))]
    CaseNotFound {
        /// Project name.
        project: String,
        /// Identifier that was searched.
        identifier: String,
    },

    /// The identifier is a prefix of several case ids.
    #[snafu(display("'{identifier}' is ambiguous, it matches {count} cases (use a longer id)"))]
    AmbiguousCase {
        /// Identifier that was searched.
        identifier: String,
        /// Number of matching cases.
        count: usize,
    },

    // ========================================================================
    // File Errors
    // ========================================================================
    /// Failed to create a directory.
    #[snafu(display("failed to create directory {}: {source}", path.display()))]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Failed to read a project file.
    #[snafu(display("failed to read {}: {source}", path.display()))]
    ReadFile {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Failed to write a project file.
    #[snafu(display("failed to write {}: {source}", path.display()))]
    WriteFile {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Failed to take the exclusive lock on a project lock file.
    #[snafu(display("failed to lock {}: {source}", path.display()))]
    LockFile {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Project file contents are not valid JSON.
    #[snafu(display("failed to parse {}: {source}", path.display()))]
    ParseProject {
        /// File path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A record could not be serialized.
    #[snafu(display("failed to serialize {what}: {source}"))]
    Serialize {
        /// Record kind.
        what: &'static str,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A stored record could not be deserialized.
    #[snafu(display("failed to deserialize {what}: {source}"))]
    Deserialize {
        /// Record kind.
        what: &'static str,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A blocking store task panicked or was aborted.
    #[snafu(display("store task failed: {source}"))]
    TaskJoin {
        /// Join error from the blocking pool.
        source: tokio::task::JoinError,
    },

    // ========================================================================
    // redb Errors
    // ========================================================================
    /// Failed to open the redb database file.
    #[snafu(display("failed to open redb database at {}: {source}", path.display()))]
    OpenDatabase {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying database error.
        #[snafu(source(from(redb::DatabaseError, Box::new)))]
        source: Box<redb::DatabaseError>,
    },

    /// Failed to begin a transaction.
    #[snafu(display("failed to begin transaction: {source}"))]
    BeginTransaction {
        /// The underlying transaction error.
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
    },

    /// Failed to open a database table.
    #[snafu(display("failed to open table: {source}"))]
    OpenTable {
        /// The underlying table error.
        #[snafu(source(from(redb::TableError, Box::new)))]
        source: Box<redb::TableError>,
    },

    /// A table read or write failed.
    #[snafu(display("table access failed: {source}"))]
    TableAccess {
        /// The underlying storage error.
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    /// Failed to commit a transaction.
    #[snafu(display("failed to commit transaction: {source}"))]
    Commit {
        /// The underlying commit error.
        #[snafu(source(from(redb::CommitError, Box::new)))]
        source: Box<redb::CommitError>,
    },
}
