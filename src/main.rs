#[tokio::main]
async fn main() {
    if let Err(e) = pool_block_watch_lib::run(std::env::args().nth(1)).await {
        eprintln!("pool-block-watch: {e}");
        std::process::exit(1);
    }
}
