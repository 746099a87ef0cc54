pub mod report;

pub use report::{emit_report_json, reset, with_report, ReportData};
