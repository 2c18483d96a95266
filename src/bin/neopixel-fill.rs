use color_eyre::eyre::{eyre, Result};
use neopixel_strip::{tokio::SerialBridge, FillLoop, Strip, StripConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::registry()
		.with(fmt::layer())
		.with(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?)
		.init();

	let config = StripConfig::default();
	let bridge = SerialBridge::find(&config)?.ok_or_else(|| eyre!("no serial ws2812 bridge found"))?;
	let mut strip = Strip::new(config, bridge)?;

	let shutdown = async {
		if let Err(error) = tokio::signal::ctrl_c().await {
			tracing::error!(%error, "failed to listen for ctrl-c");
			std::future::pending::<()>().await;
		}
	};
	let rate = strip.run_until(&FillLoop::default(), shutdown).await?;
	tracing::info!(fps = rate.fps(), "strip released");

	Ok(())
}
