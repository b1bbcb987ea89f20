//! # genie-core
//!
//! Text side of the genie bridge.
//!
//! This crate provides:
//! - Whitespace squeezing that leaves `$$$` code fences intact
//! - Marker-anchored, quote-aware JSON block extraction
//! - The ordered repair pipeline for near-valid JSON
//! - Post-processing of the GenIE_json payload into reply text
//! - The response filter that ties these together for a request
//! - Bridge configuration, the instructions document and log file handling

mod block;
mod config;
mod encoding;
mod instructions;
pub mod log_files;
mod paths;
mod postprocess;
mod processor;
pub mod repair;
mod squeeze;
mod structural;
mod text;

pub use block::{JsonBlock, extract_json_block};
pub use config::{BridgeConfig, CONFIG_ENV, DEFAULT_CONFIG_FILE};
pub use encoding::{fix_mojibake, transliterate_ascii};
pub use instructions::{InstructionBuilder, MARKER_TOKEN};
pub use paths::windows_to_wsl_path;
pub use postprocess::{TOOLS_DISABLED_NOTICE, render};
pub use processor::{NO_RESPONSE_NOTICE, ResponseProcessor};
pub use repair::{RepairStage, Repaired, parse_robustly, scrape_response_field};
pub use squeeze::{CODE_FENCE, squeeze_preserving_code};
pub use structural::repair_structure;
pub use text::{after_last, strip_ansi, truncate_with_ellipsis};
