use docker_tar_pusher::cli::{Args, Runner};
use docker_tar_pusher::{Logger, RegistryError};
use std::process;

#[tokio::main]
async fn main() {
    let args = Args::parse_args().from_env();
    let output = Logger::new(args.verbose);

    let runner = match Runner::new(args) {
        Ok(runner) => runner,
        Err(e) => {
            output.error(&e.to_string());
            process::exit(1);
        }
    };

    if let Err(e) = runner.run().await {
        output.error(&e.to_string());
        if matches!(e, RegistryError::Config(_)) {
            eprintln!();
            Args::print_examples();
        }
        process::exit(1);
    }
}
