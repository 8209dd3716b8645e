pub mod sqlite;
pub mod registry;
pub mod scanner;
pub mod scorer;
pub mod evolver;
pub mod extractor;
pub mod renderer;
pub mod coherence;
pub mod engine;
pub mod router;

pub use sqlite::SqliteStore;
pub use registry::{BasinRegistry, BasinView, InMemoryBasinStore};
pub use scanner::{FragmentScanner, ScanOutcome};
pub use scorer::ResonanceScorer;
pub use evolver::FieldEvolver;
pub use extractor::{ExtractedPatterns, PatternExtractor};
pub use renderer::CompactRenderer;
pub use coherence::{CoherenceValidator, GapFiller, NoGapFiller, PlaceholderCoherence};
pub use engine::ReconstructionEngine;
pub use router::MemoryRouter;
