//! Pipeline stages for nutrition/allergen extraction.
//!
//! Each submodule implements one step and is testable on its own. Engines
//! (pdfium, Tesseract, the LLM) sit behind traits so tests can swap them for
//! in-process fakes.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ cascade ──▶ normalize ──▶ language ──▶ llm ──▶ quality ──┬──▶ validate
//! (checks)  (pdf/ocr)   (cleanup)     (whatlang)   (text)  (gate)    │
//!                                                                    └─▶ llm (images) ─┘
//! ```
//!
//! 1. [`input`]     : MIME, size and magic-byte checks; path/URL resolution
//! 2. [`cascade`]   : digital text → layout-aware → OCR, cheapest first;
//!    pdfium ([`pdf`]) and Tesseract ([`ocr`]) run in `spawn_blocking`
//! 3. [`normalize`] : decimal-comma repair, whitespace and noise cleanup
//! 4. [`language`]  : two-letter language code for metadata and the prompt
//! 5. [`llm`]       : excerpt location, prompt, provider call with retry,
//!    JSON recovery; the only stage with network I/O
//! 6. [`quality`]   : decide whether the answer needs a visual retry
//! 7. [`encode`]    : PNG/base64 page images for the visual retry
//! 8. [`validate`]  : untyped JSON → complete, strictly-typed tables

pub mod cascade;
pub mod encode;
pub mod input;
pub mod language;
pub mod llm;
pub mod normalize;
pub mod ocr;
pub mod pdf;
pub mod quality;
pub mod validate;
