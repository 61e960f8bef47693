use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::service::{ContextService, ExtractRequest};
use crate::utils::{log_info, FileSystemWatcher, MinctxError};

/// One newline-delimited request
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// One newline-delimited response: exactly one of `result` and `error` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Value, err: &MinctxError) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorBody {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileParams {
    file_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeDiffParams {
    file_path: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptimizeImportsParams {
    file_path: String,
    #[serde(default)]
    used_symbols: Option<Vec<String>>,
}

async fn dispatch(
    service: &ContextService,
    method: &str,
    params: Value,
) -> crate::utils::Result<Value> {
    let result = match method {
        "extract_context" => {
            let request: ExtractRequest = serde_json::from_value(params)?;
            serde_json::to_value(service.extract_context(request).await?)?
        }
        "get_cached_context" => {
            let params: FileParams = serde_json::from_value(params)?;
            serde_json::to_value(service.get_cached_context(&params.file_path).await)?
        }
        "analyze_diff" => {
            let params: AnalyzeDiffParams = serde_json::from_value(params)?;
            serde_json::to_value(service.analyze_diff(&params.file_path, params.content).await?)?
        }
        "optimize_imports" => {
            let params: OptimizeImportsParams = serde_json::from_value(params)?;
            serde_json::to_value(
                service
                    .optimize_imports(&params.file_path, params.used_symbols)
                    .await?,
            )?
        }
        "cache_stats" => serde_json::to_value(service.cache_stats())?,
        "optimize_cache" => serde_json::to_value(service.optimize_cache())?,
        "clear_cache" => {
            service.clear_cache();
            serde_json::json!({ "cleared": true })
        }
        other => return Err(MinctxError::Protocol(format!("unknown method: {}", other))),
    };
    Ok(result)
}

/// Handle one input line. Blank lines produce no response.
pub async fn handle_line(service: &ContextService, line: &str) -> Option<Response> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return Some(Response::failure(Value::Null, &MinctxError::from(e))),
    };

    debug!("→ {} (id {})", request.method, request.id);
    let response = match dispatch(service, &request.method, request.params).await {
        Ok(result) => Response::success(request.id, result),
        Err(e) => {
            debug!("{} failed: {}", request.method, e);
            Response::failure(request.id, &e)
        }
    };
    Some(response)
}

/// Serve requests from `reader` until EOF, one JSON response line per request
pub async fn serve<R, W>(service: Arc<ContextService>, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(response) = handle_line(&service, &line).await {
            let mut encoded = serde_json::to_string(&response)?;
            encoded.push('\n');
            writer.write_all(encoded.as_bytes()).await?;
            writer.flush().await?;
        }
    }
    Ok(())
}

/// Absolute, symlink-free form of the watched directory.
///
/// Watcher events carry paths under the root they were registered with, and
/// those must line up with the canonical paths contexts are cached under.
pub fn resolve_watch_root(root: &Path) -> Result<PathBuf> {
    root.canonicalize()
        .with_context(|| format!("Cannot watch {}", root.display()))
}

/// Poll a watcher and drop cached state of files that change on disk
pub fn spawn_watcher(
    service: Arc<ContextService>,
    root: PathBuf,
    poll_interval: Duration,
) -> Result<JoinHandle<()>> {
    let root = resolve_watch_root(&root)?;
    let watcher = FileSystemWatcher::new(&root)?;
    log_info("👀", format!("Watching {} for changes", root.display()));

    Ok(tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            interval.tick().await;
            for event in watcher.check_events() {
                for path in event.paths() {
                    let dropped = service.invalidate(&path.to_string_lossy()).await;
                    if dropped > 0 {
                        info!(
                            "♻️ {} changed, dropped {} cached contexts",
                            path.display(),
                            dropped
                        );
                    }
                }
            }
        }
    }))
}

/// Run the stdio server, optionally watching a directory
pub async fn run_stdio(service: Arc<ContextService>, watch: Option<PathBuf>) -> Result<()> {
    let watcher_task = match watch {
        Some(root) => {
            let poll = Duration::from_millis(service.config().watch.poll_interval_ms.max(1));
            Some(spawn_watcher(service.clone(), root, poll)?)
        }
        None => None,
    };

    log_info("🚀", "minctx server ready on stdio");
    let result = serve(
        service,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await;

    if let Some(task) = watcher_task {
        task.abort();
    }
    if let Err(e) = &result {
        error!("Server stopped: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Config;
    use crate::context::{ExtractedContext, MockContextExtractor, MockImportAnalyzer};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn service() -> Arc<ContextService> {
        let mut extractor = MockContextExtractor::new();
        extractor.expect_extract().returning(|_, _| {
            Ok(ExtractedContext {
                code: "fn a() {}".to_string(),
                symbols: vec!["a".to_string()],
                source_tokens: 10,
                ..Default::default()
            })
        });
        Arc::new(ContextService::new(
            Config::default(),
            Arc::new(extractor),
            Arc::new(MockImportAnalyzer::new()),
        ))
    }

    #[tokio::test]
    async fn test_blank_lines_are_ignored() {
        assert!(handle_line(&service(), "   ").await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_line_is_protocol_error_without_id() {
        let response = handle_line(&service(), "{not json").await.unwrap();
        assert_eq!(response.id, Value::Null);
        assert_eq!(response.error.unwrap().kind, "protocol");
    }

    #[tokio::test]
    async fn test_unknown_method_keeps_request_id() {
        let response = handle_line(&service(), r#"{"id": 7, "method": "nope"}"#)
            .await
            .unwrap();
        assert_eq!(response.id, json!(7));
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().kind, "protocol");
    }

    #[tokio::test]
    async fn test_extract_then_stats_over_a_stream() {
        let input = concat!(
            r#"{"id": 1, "method": "extract_context", "params": "#,
            r#"{"filePath": "/virtual/a.rs", "includeImports": false}}"#,
            "\n\n",
            r#"{"id": 2, "method": "extract_context", "params": "#,
            r#"{"filePath": "/virtual/a.rs", "includeImports": false}}"#,
            "\n",
            r#"{"id": 3, "method": "cache_stats"}"#,
            "\n",
        );
        let mut output = Vec::new();
        serve(service(), input.as_bytes(), &mut output).await.unwrap();

        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["result"]["cached"], json!(false));
        assert_eq!(responses[0]["result"]["context"]["extractedCode"], json!("fn a() {}"));
        assert_eq!(responses[1]["result"]["cached"], json!(true));
        assert_eq!(responses[1]["result"]["tokenSavings"]["originalTokens"], json!(10));
        assert_eq!(responses[2]["result"]["totalEntries"], json!(1));
        assert_eq!(responses[2]["id"], json!(3));
    }

    #[tokio::test]
    async fn test_missing_params_is_protocol_error() {
        let response = handle_line(&service(), r#"{"id": "x", "method": "analyze_diff"}"#)
            .await
            .unwrap();
        assert_eq!(response.id, json!("x"));
        assert_eq!(response.error.unwrap().kind, "protocol");
    }

    #[tokio::test]
    async fn test_clear_cache_method() {
        let service = service();
        handle_line(
            &service,
            concat!(
                r#"{"id": 1, "method": "extract_context", "params": "#,
                r#"{"filePath": "/virtual/a.rs", "includeImports": false}}"#,
            ),
        )
        .await
        .unwrap();
        assert_eq!(service.cache().len(), 1);

        let response = handle_line(&service, r#"{"id": 2, "method": "clear_cache"}"#)
            .await
            .unwrap();
        assert_eq!(response.result, Some(json!({ "cleared": true })));
        assert!(service.cache().is_empty());
    }

    #[test]
    fn test_relative_watch_root_is_made_canonical() {
        let dir = tempfile::Builder::new().tempdir_in(".").unwrap();
        let dir_name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        let relative = PathBuf::from(format!("./{}/../{}", dir_name, dir_name));

        let root = resolve_watch_root(&relative).unwrap();
        assert!(root.is_absolute());
        assert_eq!(root, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_missing_watch_root_names_it() {
        let err = resolve_watch_root(Path::new("./no-such-dir-here")).unwrap_err();
        assert!(err.to_string().contains("no-such-dir-here"));
    }
}
