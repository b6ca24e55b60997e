use folio_lsp::FolioLanguageServer;
use tokio::io::{stdin, stdout};
use tower_lsp::{LspService, Server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries the protocol stream.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let stdin = stdin();
    let stdout = stdout();
    let (service, socket) = LspService::build(FolioLanguageServer::new)
        .custom_method("folio/audit", FolioLanguageServer::audit_request)
        .custom_method("folio/outline", FolioLanguageServer::outline_request)
        .custom_method("folio/fileTree", FolioLanguageServer::file_tree_request)
        .custom_method("folio/references", FolioLanguageServer::references_request)
        .finish();
    Server::new(stdin, stdout, socket).serve(service).await;
}
