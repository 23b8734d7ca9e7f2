use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Admin commands are short transactions; on a signal, stop without
    // waiting for them. SQLite rolls back any open transaction.
    tokio::spawn(async {
        shutdown_signal().await;
        eprintln!("\nReceived shutdown signal, exiting.");
        std::process::exit(130);
    });

    match steadfast::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::from(steadfast::errors::get_exit_code(&e))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(_) => {
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
