#[cfg(not(unix))]
compile_error!("Only unix platforms are currently supported");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = tribe::TribeConfig::load()?;
    tribe::Tribe::new(config).run().await
}
