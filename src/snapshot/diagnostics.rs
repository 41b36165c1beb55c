//! Diagnostics collection for snapshot loading and analysis.
//!
//! This module provides types for collecting and reporting diagnostic messages
//! during snapshot analysis. Captured heaps routinely contain types whose declared
//! field layout cannot be honored against the actual bytes (truncated sections,
//! corrupt metadata); those are reported here and analysis continues, rather than
//! aborting on the first bad type.
//!
//! # Architecture
//!
//! The diagnostics system is shared across the analysis pipeline:
//! - **Snapshot initialize**: reports structural oddities that are recoverable
//! - **MemoryReader**: reports invalid layouts, deduplicated per type
//! - **Analysis passes**: report skipped objects in aggregate
//!
//! The [`Diagnostics`] container uses `boxcar::Vec` for thread-safe, lock-free
//! append operations, allowing diagnostics to be collected from parallel analysis
//! passes without synchronization overhead. Per-type deduplication of layout
//! reports uses a concurrent set, so a single corrupt type produces one entry no
//! matter how many of its instances are scanned.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use heapscope::snapshot::{Diagnostics, DiagnosticCategory};
//!
//! let diagnostics = Diagnostics::new();
//!
//! diagnostics.warning(
//!     DiagnosticCategory::Section,
//!     "Section at 0x7f3000 shorter than its declared length",
//! );
//!
//! if diagnostics.has_errors() {
//!     println!("Errors found: {}", diagnostics.error_count());
//! }
//!
//! for entry in diagnostics.iter() {
//!     println!("[{:?}] {}: {}", entry.severity, entry.category, entry.message);
//! }
//! ```

use std::fmt;

use dashmap::DashSet;

use crate::snapshot::entities::ManagedTypeIndex;

/// Severity level of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticSeverity {
    /// Informational message, not indicating a problem.
    Info,

    /// Warning about potentially problematic data.
    ///
    /// Analysis continues, but some data may be missing from results (e.g. an
    /// object omitted from a duplicate group).
    Warning,

    /// Error indicating invalid or corrupt data that degraded a result.
    Error,
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticSeverity::Info => write!(f, "INFO"),
            DiagnosticSeverity::Warning => write!(f, "WARN"),
            DiagnosticSeverity::Error => write!(f, "ERROR"),
        }
    }
}

/// Category indicating the source or type of diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCategory {
    /// A type's declared field layout conflicts with the captured bytes.
    ///
    /// Examples: field offset past the end of a section, negative array length.
    Layout,

    /// Issues with type metadata itself.
    ///
    /// Examples: inheritance chain exceeding the hop limit, missing field types.
    Type,

    /// Issues with individual objects.
    ///
    /// Examples: objects skipped during a duplicate scan.
    Object,

    /// Issues with memory sections.
    Section,

    /// General loading issues not fitting other categories.
    General,
}

impl fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticCategory::Layout => write!(f, "Layout"),
            DiagnosticCategory::Type => write!(f, "Type"),
            DiagnosticCategory::Object => write!(f, "Object"),
            DiagnosticCategory::Section => write!(f, "Section"),
            DiagnosticCategory::General => write!(f, "General"),
        }
    }
}

/// A single diagnostic entry with context information.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level of this diagnostic.
    pub severity: DiagnosticSeverity,
    /// Category of the diagnostic source.
    pub category: DiagnosticCategory,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.category, self.message)
    }
}

/// Thread-safe container for diagnostic entries.
///
/// Append operations are lock-free; multiple analysis threads can report
/// concurrently without coordination. Layout reports are deduplicated per managed
/// type so a corrupt type encountered across a whole-heap scan does not flood the
/// sink.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: boxcar::Vec<Diagnostic>,
    reported_layout_types: DashSet<ManagedTypeIndex>,
}

impl Diagnostics {
    /// Create an empty diagnostics container.
    #[must_use]
    pub fn new() -> Self {
        Diagnostics {
            entries: boxcar::Vec::new(),
            reported_layout_types: DashSet::new(),
        }
    }

    /// Report that a type's declared layout cannot be honored against the
    /// captured bytes.
    ///
    /// Reported once per type: repeat reports for the same type are dropped, so
    /// callers can report unconditionally from per-instance code paths.
    pub fn invalid_layout(&self, type_index: ManagedTypeIndex, type_name: &str, reason: &str) {
        if !self.reported_layout_types.insert(type_index) {
            return;
        }

        self.entries.push(Diagnostic {
            severity: DiagnosticSeverity::Warning,
            category: DiagnosticCategory::Layout,
            message: format!("type '{type_name}' ({type_index}): {reason}"),
        });
    }

    /// Append an informational entry.
    pub fn info(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(DiagnosticSeverity::Info, category, message.into());
    }

    /// Append a warning entry.
    pub fn warning(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(DiagnosticSeverity::Warning, category, message.into());
    }

    /// Append an error entry.
    pub fn error(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(DiagnosticSeverity::Error, category, message.into());
    }

    fn push(&self, severity: DiagnosticSeverity, category: DiagnosticCategory, message: String) {
        self.entries.push(Diagnostic {
            severity,
            category,
            message,
        });
    }

    /// Whether any error-severity entries were collected.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.iter().any(|d| d.severity == DiagnosticSeverity::Error)
    }

    /// Number of error-severity entries.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
            .count()
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.count()
    }

    /// Whether the container is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all collected entries.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().map(|(_, d)| d)
    }
}
