//! Synthetic document generator for keyhole-sim load runs.
//!
//! Produces a lazy, restartable sequence of BSON documents for the population
//! step and for inserts replayed during simulation. Generation is seeded so a
//! run can be reproduced.
//!
//! # Architecture
//!
//! ```text
//!   document template (optional JSON)
//!          │
//!          ▼
//! ┌───────────────────┐
//! │ DocumentGenerator │
//! │                   │
//! │  - seed           │
//! │  - rng (StdRng)   │
//! │  - index          │
//! └─────────┬─────────┘
//!           │
//!           ▼
//!     bson::Document
//! ```
//!
//! # Example
//!
//! ```rust
//! use sim_generator::DocumentGenerator;
//!
//! let mut generator = DocumentGenerator::new(42);
//! let doc = generator.next_document();
//! assert!(doc.contains_key("email"));
//! ```
//!
//! Without a template the generator emits a built-in example document whose
//! `email` field starts with a random uppercase letter, which spreads inserts
//! across an alphabetic shard key domain.

pub mod generator;
pub mod pattern;
pub mod randomize;

pub use generator::{DocumentGenerator, DocumentIterator, GeneratorError};
pub use randomize::randomize_document;
