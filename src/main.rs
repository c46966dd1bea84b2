use std::process;
use std::sync::Arc;

use signd::config::Config;
use signd::daemon::start::start_signd_daemon;

#[tokio::main]
async fn main() {
    match Config::create() {
        Ok(config) => {
            if let Err(e) = start_signd_daemon(Arc::new(config)).await {
                eprintln!("signd failed: {e}");
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}
