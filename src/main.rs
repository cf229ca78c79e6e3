use std::env;
use std::path::Path;

use fire_sim::core::SeriesStore;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let raw_args: Vec<String> = env::args().collect();
    if raw_args.get(1).map(|s| s.as_str()) == Some("serve") {
        let port = raw_args
            .get(2)
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(8080);
        let series = match raw_args.get(3) {
            Some(path) => match fire_sim::api::load_series(Path::new(path)) {
                Ok(series) => series,
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            },
            None => {
                log::warn!("no series file given; requests must embed their own series");
                SeriesStore::default()
            }
        };
        if let Err(e) = fire_sim::api::run_http_server(port, series).await {
            eprintln!("Server error: {e}");
            std::process::exit(1);
        }
        return;
    }

    if let Err(e) = fire_sim::api::run_cli() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
