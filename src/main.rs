use labstock::app;
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Optional bind address as the first argument
    let args: Vec<String> = env::args().collect();
    let addr = if args.len() >= 2 {
        args[1].clone()
    } else {
        "127.0.0.1:3000".to_string()
    };

    app::run(&addr).await
}
