//! User-facing error message formatting.
//!
//! Uses typed error matching (PolarsError variants, io::ErrorKind, serde_json categories)
//! rather than string parsing to produce short, actionable messages.

use polars::prelude::PolarsError;
use std::io;

/// Format a PolarsError as a user-facing message by matching on its variant.
pub fn user_message_from_polars(err: &PolarsError) -> String {
    use polars::prelude::PolarsError as PE;

    match err {
        PE::ColumnNotFound(msg) => format!("Column not found: {}", msg),
        PE::IO { error, msg } => {
            user_message_from_io(error.as_ref(), msg.as_ref().map(|m| m.as_ref()))
        }
        PE::NoData(msg) => format!("No data: {}", msg),
        PE::SchemaMismatch(msg) => format!("Schema mismatch: {}", msg),
        PE::ShapeMismatch(msg) => format!("Row shape mismatch: {}", msg),
        PE::ComputeError(msg) => format!("Computation failed: {}", msg),
        PE::Context { error, msg } => {
            format!("{}: {}", msg, user_message_from_polars(error))
        }
        #[allow(unreachable_patterns)]
        _ => err.to_string(),
    }
}

/// Format an io::Error as a user-facing message by matching on ErrorKind.
pub fn user_message_from_io(err: &io::Error, context: Option<&str>) -> String {
    use std::io::ErrorKind;

    let base = match err.kind() {
        ErrorKind::NotFound => "File or directory not found.".to_string(),
        ErrorKind::PermissionDenied => "Permission denied. Check read access.".to_string(),
        ErrorKind::ConnectionRefused => "Connection refused.".to_string(),
        ErrorKind::ConnectionReset => "Connection reset.".to_string(),
        ErrorKind::TimedOut => "Operation timed out.".to_string(),
        ErrorKind::InvalidData | ErrorKind::InvalidInput => {
            "Invalid or corrupted data.".to_string()
        }
        ErrorKind::UnexpectedEof => "Unexpected end of file.".to_string(),
        _ => err.to_string(),
    };

    match context {
        Some(ctx) if !ctx.is_empty() => format!("{} {}", base, ctx),
        _ => base,
    }
}

/// Format a JSON error with its position.
pub fn user_message_from_json(err: &serde_json::Error) -> String {
    use serde_json::error::Category;

    match err.classify() {
        Category::Io => format!("I/O error while reading JSON: {}", err),
        Category::Syntax => format!(
            "Invalid JSON at line {}, column {}.",
            err.line(),
            err.column()
        ),
        Category::Data => format!("Unexpected JSON shape: {}", err),
        Category::Eof => "JSON ended unexpectedly.".to_string(),
    }
}

/// Walk a report's cause chain and format the first error we know how to describe.
/// Falls back to the first line of the outermost message.
pub fn user_message_from_report(report: &color_eyre::eyre::Report) -> String {
    let outer = report
        .to_string()
        .lines()
        .next()
        .map(str::trim)
        .unwrap_or("An error occurred")
        .to_string();

    for cause in report.chain() {
        let detail = if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            user_message_from_io(io_err, None)
        } else if let Some(pe) = cause.downcast_ref::<PolarsError>() {
            user_message_from_polars(pe)
        } else if let Some(je) = cause.downcast_ref::<serde_json::Error>() {
            user_message_from_json(je)
        } else {
            continue;
        };
        return if detail == outer {
            detail
        } else {
            format!("{}: {}", outer, detail)
        };
    }
    outer
}
