#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bgremove_server::cli::main().await
}
