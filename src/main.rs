use rust_manga_multisrc::config::Config;
use rust_manga_multisrc::http_client::{CallContext, HttpExecutor, HttpRequest, InterceptedClient};
use rust_manga_multisrc::overlay::ComposedImageInterceptor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

fn usage() -> ! {
    eprintln!("usage: overlay-compose <image-url#[dialogues]> <output-file> [config.toml]");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let (Some(image_url), Some(output)) = (args.next(), args.next()) else {
        usage();
    };
    let config = match args.next() {
        Some(path) => Config::load_from(Path::new(&path)),
        None => Config::load(),
    };

    let client = config.http.create_http_client()?;
    let overlay = ComposedImageInterceptor::from_settings(&config.overlay, Some(BUNDLED_FONT));
    let client = InterceptedClient::new(Arc::new(client)).with_interceptor(Arc::new(overlay));

    let url = url::Url::parse(&image_url)?;
    let ctx = CallContext::with_timeout(Duration::from_secs(config.http.timeout_secs * 3));
    let response = client.execute(HttpRequest::get(url), &ctx).await?.error_for_status()?;

    std::fs::write(&output, &response.body)?;
    log::info!(
        "Wrote {} bytes ({}) to {}",
        response.body.len(),
        response.header("content-type").unwrap_or("unknown type"),
        output
    );
    println!("✓ {}", output);

    Ok(())
}
