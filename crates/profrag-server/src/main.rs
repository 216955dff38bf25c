#[tokio::main]
async fn main() {
    if let Err(err) = profrag_server::run().await {
        tracing::error!(error = %err, "profrag-server failed");
        eprintln!("profrag-server: {err}");
        std::process::exit(1);
    }
}
