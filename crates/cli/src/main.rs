use clap::Parser;
use restfeature_cli::Restfeature;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let restfeature = Restfeature::parse();
    match restfeature.run(true).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}
