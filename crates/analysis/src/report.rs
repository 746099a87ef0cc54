//! Process-wide obfuscation report aggregator.
//!
//! Passes increment counters as they run; the CLI asks for the rendered JSON
//! document once the pipeline finishes. The aggregator is lazily initialized
//! and guarded by a mutex so a host that drives several modules from worker
//! threads still gets coherent counts.

use chakravyuha_core::Module;
use serde::Serialize;
use serde_json::json;
use std::sync::{LazyLock, Mutex};
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct ReportData {
    pub input_file: String,
    pub output_file: String,
    pub obfuscation_level: String,
    pub enable_string_encryption: bool,
    pub enable_control_flow_flattening: bool,
    pub enable_fake_code_insertion: bool,

    // string encryption
    pub strings_encrypted: u64,
    pub original_string_data_size: u64,
    pub obfuscated_string_data_size: u64,
    pub string_method: String,

    // control flow flattening
    pub flattened_functions: u64,
    pub flattened_blocks: u64,
    pub skipped_functions: u64,

    // fake code insertion
    pub fake_code_blocks_inserted: u64,
    pub fake_loops_inserted: u64,
    pub fake_conditionals_inserted: u64,
    pub total_bogus_instructions: u64,

    pub passes_run: Vec<String>,
    pub obfuscation_methods: Vec<String>,

    #[serde(skip)]
    started: Option<Instant>,
    pub duration_seconds: f64,
}

impl Default for ReportData {
    fn default() -> Self {
        ReportData {
            input_file: String::new(),
            output_file: "obfuscated.json".to_string(),
            obfuscation_level: "medium".to_string(),
            enable_string_encryption: false,
            enable_control_flow_flattening: false,
            enable_fake_code_insertion: false,
            strings_encrypted: 0,
            original_string_data_size: 0,
            obfuscated_string_data_size: 0,
            string_method: String::new(),
            flattened_functions: 0,
            flattened_blocks: 0,
            skipped_functions: 0,
            fake_code_blocks_inserted: 0,
            fake_loops_inserted: 0,
            fake_conditionals_inserted: 0,
            total_bogus_instructions: 0,
            passes_run: Vec::new(),
            obfuscation_methods: Vec::new(),
            started: None,
            duration_seconds: 0.0,
        }
    }
}

impl ReportData {
    pub fn start_timer(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop_timer(&mut self) {
        if let Some(started) = self.started.take() {
            self.duration_seconds = started.elapsed().as_secs_f64();
        }
    }

    fn finalize_defaults(&mut self, module: &Module) {
        if self.input_file.is_empty() {
            self.input_file = module.name.clone();
        }
        self.obfuscation_methods.clear();
        if self.enable_string_encryption {
            self.obfuscation_methods
                .push("String Encryption (XOR)".to_string());
        }
        if self.enable_control_flow_flattening {
            self.obfuscation_methods
                .push("Control Flow Flattening".to_string());
        }
        if self.enable_fake_code_insertion {
            self.obfuscation_methods
                .push("Fake Code Insertion".to_string());
            if self.fake_loops_inserted > 0 {
                self.obfuscation_methods
                    .push("Fake Loop Insertion".to_string());
            }
            if self.fake_conditionals_inserted > 0 {
                self.obfuscation_methods
                    .push("Fake Conditional Insertion".to_string());
            }
        }
    }
}

static REPORT: LazyLock<Mutex<ReportData>> = LazyLock::new(|| Mutex::new(ReportData::default()));

/// Runs `f` with exclusive access to the process-wide report.
pub fn with_report<R>(f: impl FnOnce(&mut ReportData) -> R) -> R {
    let mut guard = REPORT.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}

/// Clears all collected data. Tests call this between pipelines.
pub fn reset() {
    with_report(|r| *r = ReportData::default());
}

/// Finalizes defaults against `module` and renders the report document.
pub fn emit_report_json(module: &Module) -> serde_json::Value {
    with_report(|r| {
        r.finalize_defaults(module);
        r.stop_timer();

        let string_change_pct = if r.original_string_data_size != 0 {
            (r.obfuscated_string_data_size as f64 - r.original_string_data_size as f64)
                / r.original_string_data_size as f64
                * 100.0
        } else {
            0.0
        };
        let method = if r.string_method.is_empty() {
            "N/A".to_string()
        } else {
            r.string_method.clone()
        };

        json!({
            "inputFile": r.input_file,
            "outputFile": r.output_file,
            "inputParameters": {
                "obfuscationLevel": r.obfuscation_level,
                "enableStringEncryption": r.enable_string_encryption,
                "enableControlFlowFlattening": r.enable_control_flow_flattening,
                "enableFakeCodeInsertion": r.enable_fake_code_insertion,
            },
            "outputAttributes": {
                "originalIRStringDataSize": format!("{} bytes", r.original_string_data_size),
                "obfuscatedIRStringDataSize": format!("{} bytes", r.obfuscated_string_data_size),
                "stringDataSizeChange": format!("{string_change_pct:.2}%"),
                "durationSeconds": r.duration_seconds,
                "obfuscationMethods": r.obfuscation_methods,
            },
            "obfuscationMetrics": {
                "passesRun": r.passes_run,
                "stringEncryption": {
                    "count": r.strings_encrypted,
                    "method": method,
                },
                "controlFlowFlattening": {
                    "flattenedFunctions": r.flattened_functions,
                    "flattenedBlocks": r.flattened_blocks,
                    "skippedFunctions": r.skipped_functions,
                },
                "fakeCodeInsertion": {
                    "totalBogusInstructions": r.total_bogus_instructions,
                    "fakeBlocks": r.fake_code_blocks_inserted,
                    "fakeLoops": r.fake_loops_inserted,
                    "fakeConditionals": r.fake_conditionals_inserted,
                },
            },
        })
    })
}
