#[tokio::main]
async fn main() -> anyhow::Result<()> {
    serene_client::init_tracing();
    serene_client::run().await
}
