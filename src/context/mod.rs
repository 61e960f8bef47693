// Gateway module for context - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod extractor;
mod imports;
mod tree_parser;

// Public re-exports - the ONLY way to access context functionality
pub use extractor::{
    identifiers, strip_imports, ContextExtractor, ExtractedContext, TreeSitterExtractor,
};
pub use imports::{retain_used, ImportAnalyzer, ImportOptimizer};
pub use tree_parser::{Definition, ImportStatement, Language, ParsedSource, SymbolKind, TreeParser};

#[cfg(test)]
pub use extractor::MockContextExtractor;
#[cfg(test)]
pub use imports::MockImportAnalyzer;
