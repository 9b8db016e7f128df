//! Main generator for producing synthetic documents.

use crate::pattern::{generate_pattern, generate_random_digits};
use crate::randomize::randomize_document;
use bson::{doc, Bson, DateTime, Document};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Error type for generator operations.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    /// The document template cannot be used to generate documents.
    #[error("Invalid document template: {0}")]
    InvalidTemplate(String),
}

const FIRST_NAMES: &[&str] = &[
    "Alice", "Bob", "Carol", "Dave", "Erin", "Frank", "Grace", "Heidi", "Ivan", "Judy",
];

const TAGS: &[&str] = &["red", "green", "blue", "gold", "silver", "black", "white"];

/// Generator that produces synthetic documents for population and inserts.
///
/// With the same seed (and template) the generator yields the same sequence of
/// documents, apart from wall-clock derived date fields.
pub struct DocumentGenerator {
    /// Optional shape that generated documents follow
    template: Option<Document>,
    /// Base seed, kept so the sequence can be restarted
    seed: u64,
    /// Seeded random number generator for reproducibility
    rng: StdRng,
    /// Current document index
    index: u64,
}

impl DocumentGenerator {
    /// Create a generator for the built-in example document shape.
    pub fn new(seed: u64) -> Self {
        Self {
            template: None,
            seed,
            rng: StdRng::seed_from_u64(seed),
            index: 0,
        }
    }

    /// Create a generator whose documents are randomizations of `template`.
    ///
    /// The template's `_id` is dropped so every insert gets a fresh one.
    pub fn with_template(template: Document, seed: u64) -> Result<Self, GeneratorError> {
        let mut template = template;
        template.remove("_id");
        if template.is_empty() {
            return Err(GeneratorError::InvalidTemplate(
                "template has no fields besides _id".to_string(),
            ));
        }
        Ok(Self {
            template: Some(template),
            ..Self::new(seed)
        })
    }

    /// Restart the sequence from the first document.
    pub fn restart(&mut self) {
        self.index = 0;
        self.rng = StdRng::seed_from_u64(self.seed);
    }

    /// Get the current document index.
    pub fn current_index(&self) -> u64 {
        self.index
    }

    /// Generate the next document.
    pub fn next_document(&mut self) -> Document {
        let index = self.index;
        let doc = match &self.template {
            Some(template) => randomize_document(template, &mut self.rng),
            None => example_document(&mut self.rng, index),
        };
        self.index += 1;
        doc
    }

    /// Lazily generate `count` documents.
    pub fn documents(&mut self, count: u64) -> DocumentIterator<'_> {
        DocumentIterator {
            generator: self,
            remaining: count,
        }
    }

    /// Randomize the leaf values of a filter or update document.
    pub fn randomize(&mut self, doc: &Document) -> Document {
        randomize_document(doc, &mut self.rng)
    }
}

/// Build the built-in example document.
///
/// `email` starts with a random uppercase letter so that documents spread
/// across the `A`-`Z` shard key domain.
fn example_document<R: Rng>(rng: &mut R, index: u64) -> Document {
    let first = FIRST_NAMES[rng.random_range(0..FIRST_NAMES.len())];
    let tag_count = rng.random_range(1..=3_usize);
    let tags: Vec<Bson> = (0..tag_count)
        .map(|_| Bson::String(TAGS[rng.random_range(0..TAGS.len())].to_string()))
        .collect();
    let now = DateTime::now().timestamp_millis();

    doc! {
        "email": generate_pattern("{letter}{word:7}.{index}@example.com", rng, index),
        "_search": generate_random_digits(rng, 8),
        "name": { "first": first, "last": generate_pattern("{letter}{word:6}", rng, index) },
        "age": rng.random_range(18..80_i32),
        "balance": (rng.random::<f64>() * 10_000.0 * 100.0).round() / 100.0,
        "active": rng.random_bool(0.8),
        "tags": tags,
        "ts": DateTime::from_millis(now - rng.random_range(0..86_400_000_i64)),
        "seq": index as i64,
    }
}

/// Iterator that lazily generates documents.
pub struct DocumentIterator<'a> {
    generator: &'a mut DocumentGenerator,
    remaining: u64,
}

impl Iterator for DocumentIterator<'_> {
    type Item = Document;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.generator.next_document())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DocumentIterator<'_> {}
