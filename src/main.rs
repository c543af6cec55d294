#[tokio::main]
async fn main() {
    if let Err(err) = reqflow::rpc::server::run_stdio().await {
        eprintln!("reqflow: {}", err);
        std::process::exit(1);
    }
}
