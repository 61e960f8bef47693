use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "minctx")]
#[command(version)]
#[command(
    about = "Minimal context extraction and incremental diffs for AI coding assistants",
    long_about = None
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve newline-delimited JSON requests on stdin/stdout
    Serve {
        /// Invalidate cached contexts when files under this directory change
        #[arg(long)]
        watch: Option<PathBuf>,
    },
    /// Extract the minimal context of a file
    Extract {
        file: PathBuf,

        /// Only these symbols (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Leave imports out of the context
        #[arg(long)]
        no_imports: bool,

        /// Truncate the context to this many tokens
        #[arg(long)]
        max_tokens: Option<usize>,
    },
    /// Line diff between two files
    Diff {
        old: PathBuf,
        new: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Write a default configuration file
    Init,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Colored hunks
    Text,
    /// JSON change records
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_symbols_are_comma_separated() {
        let cli = Cli::parse_from([
            "minctx",
            "extract",
            "src/lib.rs",
            "--symbols",
            "a,b",
            "--no-imports",
        ]);
        match cli.command {
            Commands::Extract {
                symbols,
                no_imports,
                max_tokens,
                ..
            } => {
                assert_eq!(symbols, vec!["a", "b"]);
                assert!(no_imports);
                assert_eq!(max_tokens, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["minctx", "diff", "a.txt", "b.txt", "--format", "json", "-v"]);
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Diff {
                format: OutputFormat::Json,
                ..
            }
        ));
    }

    #[test]
    fn test_serve_watch_is_optional() {
        let cli = Cli::parse_from(["minctx", "serve"]);
        assert!(matches!(cli.command, Commands::Serve { watch: None }));
    }
}
