use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

use crate::{
    app::{init_config, load_config, Config},
    diff::{render_minimal_update, DiffChange, DiffEngine},
    runtime::{run_stdio, ContextService, ExtractRequest},
};

use super::{Cli, Commands, OutputFormat};

/// Handle CLI subcommands
pub async fn handle_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Init => {
            println!("Initializing minctx configuration...");
            let path = init_config(cli.config.clone())?;
            println!("Configuration written to {}", path.display().to_string().green());
            Ok(())
        }
        Commands::Serve { watch } => {
            let config = load_config(cli.config.as_deref())?;
            let service = Arc::new(ContextService::with_tree_sitter(config)?);
            run_stdio(service, watch.clone()).await
        }
        Commands::Extract {
            file,
            symbols,
            no_imports,
            max_tokens,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_extract(config, file, symbols, *no_imports, *max_tokens).await
        }
        Commands::Diff { old, new, format } => {
            let config = load_config(cli.config.as_deref())?;
            run_diff(&config, old, new, *format).await
        }
    }
}

async fn run_extract(
    config: Config,
    file: &Path,
    symbols: &[String],
    no_imports: bool,
    max_tokens: Option<usize>,
) -> Result<()> {
    let service = ContextService::with_tree_sitter(config)?;
    let request = ExtractRequest {
        file_path: file.to_string_lossy().into_owned(),
        target_symbols: (!symbols.is_empty()).then(|| symbols.to_vec()),
        include_imports: Some(!no_imports),
        max_tokens,
    };
    let response = service.extract_context(request).await?;
    let context = &response.context;

    if !context.imports().is_empty() {
        println!("{}\n", context.imports().join("\n"));
    }
    println!("{}", context.extracted_code());

    let savings = response.token_savings;
    eprintln!(
        "{} {} tokens of {} ({}% saved)",
        "✂️".cyan(),
        savings.context_tokens.to_string().bold(),
        savings.original_tokens,
        savings.saved_percent.to_string().green()
    );
    if !context.dependencies.is_empty() {
        eprintln!("   depends on: {}", context.dependencies.join(", ").yellow());
    }
    Ok(())
}

async fn run_diff(config: &Config, old: &Path, new: &Path, format: OutputFormat) -> Result<()> {
    let old_text = tokio::fs::read_to_string(old)
        .await
        .with_context(|| format!("Failed to read {}", old.display()))?;
    let new_text = tokio::fs::read_to_string(new)
        .await
        .with_context(|| format!("Failed to read {}", new.display()))?;

    let changes = DiffEngine::new(config.diff.max_table_cells).diff(&old_text, &new_text);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&changes)?),
        OutputFormat::Text => print!("{}", format_changes(&changes)),
    }
    Ok(())
}

/// Colored rendering of hunks for the terminal
pub fn format_changes(changes: &[DiffChange]) -> String {
    if changes.is_empty() {
        return format!("{}\n", "No differences".dimmed());
    }

    let mut out = String::new();
    for line in render_minimal_update(changes).lines() {
        let styled = if line.starts_with("@@") {
            line.cyan()
        } else if line.starts_with('-') {
            line.red()
        } else {
            line.green()
        };
        out.push_str(&styled.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_changes_plain() {
        colored::control::set_override(false);
        let changes = DiffEngine::default().diff("a\nb", "a\nc");
        assert_eq!(format_changes(&changes), "@@ -2,1 +2,1 @@\n+c\n");
        assert_eq!(format_changes(&[]), "No differences\n");
    }

    #[tokio::test]
    async fn test_diff_of_missing_file_names_it() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("old.txt");
        let err = run_diff(&Config::default(), &missing, &missing, OutputFormat::Json)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("old.txt"));
    }
}
