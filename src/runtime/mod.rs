/// Runtime service and stdio server module - Gateway

mod server;
mod service;

pub use server::{
    handle_line, resolve_watch_root, run_stdio, serve, spawn_watcher, ErrorBody, Request, Response,
};
pub use service::{
    ContextService, DiffAnalysis, ExtractRequest, ExtractResponse, ImportReport, TokenSavings,
};
