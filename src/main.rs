use photo_contest::config::Config;
use rocket::launch;
use tracing_subscriber::EnvFilter;


#[launch]
async fn rocket() -> _ {
    init_tracing();

    // Try to read the config file
    let config = Config::read_or_exit();

    // Open the stores and build the server, or exit immediately in case of an error
    photo_contest::build(config).await
        .unwrap_or_else(|error| {
            eprintln!("Error : unable to start the contest server : {}", error);
            std::process::exit(-1)
        })
}


/// Log to stderr, filtered with `RUST_LOG` (default : info)
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // Fails only if a subscriber is already installed, which is fine
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
