use tracing_subscriber::EnvFilter;

fn main() {
    let _ = dotenvy::dotenv();

    let filter = std::env::var("RAGTUNE_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(err) = ragtune::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
