use std::process::ExitCode;

use clap::Parser;

use spraystat::{Args, fake_adapter, real_adapter, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let (settings, maybe_fake_args) = args.into_settings_and_fake_args()?;
        let adapter = match maybe_fake_args {
            Some(fake_args) => fake_adapter(fake_args),
            None => real_adapter(),
        };

        run(settings, &mut stdout, adapter).await
    }
    .await;

    match run_result {
        Ok(status) => status.exit_code(),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
