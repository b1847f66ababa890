//! scansplit - barcode-separated scan batch splitter.
//!
//! Takes one multi-document PDF, detects the separator barcode on its first
//! page, splits the remaining pages into segments at every repeat of that
//! barcode, names each segment from its first page's text (with OCR fallback)
//! and writes every segment to its own PDF.

pub mod cache;
pub mod cli;
pub mod config;
pub mod extract;
pub mod naming;
pub mod pipeline;
pub mod recognition;
pub mod segment;
pub mod store;
pub mod tools;
