// NCTS monthly intake - core library
// Shared by the `ncts-intake` and `filter-medicinal-products` binaries

pub mod change_report;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod intake;
pub mod logging;

// Re-export commonly used types
pub use change_report::{
    filter_report, run_filter, sniff_delimiter,
    DateSpan, FilterReport, ProductSummary, ReportLayout,
};
pub use config::Config;
pub use discovery::{
    find_latest, latest, list_candidates,
    ByFileName, ByModifiedTime, Candidate, FilePattern, Recency, RecencyKind,
};
pub use error::{exit_code, library_error, Error, Result};
pub use intake::{
    extract_members, normalize_name, place_shortages, place_snapshots, run_intake,
    Destination, IntakeReport, MemberRule, PlacedFile, ShortagesCopy, SnapshotReport,
    MEMBER_RULES,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
