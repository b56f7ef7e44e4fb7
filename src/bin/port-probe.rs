use clap::{Parser, Subcommand};
use std::time::Duration;

use port_warden::net::{LsofLister, OccupancyReport, PortProbe, ProcessReaper, SignalKiller};

#[derive(Parser)]
#[command(name = "port-probe")]
#[command(about = "Inspect and free TCP ports held by stale processes", long_about = None)]
struct Cli {
    /// Upper bound on each OS query, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Print reports as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List processes listening on a port
    Who { port: u16 },
    /// SIGKILL processes listening on a port, then re-check
    Free {
        port: u16,

        /// Wait for the kernel to release the socket, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        settle_ms: u64,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "port_warden=warn".into()),
        )
        .init();

    let probe = PortProbe::new(LsofLister::new(Duration::from_millis(cli.timeout_ms)));

    match cli.command {
        Commands::Who { port } => {
            let report = probe.query(port).await;
            print_report(&report, cli.json)?;
        }
        Commands::Free { port, settle_ms } => {
            let report = probe.query(port).await;
            if report.is_empty() {
                print_report(&report, cli.json)?;
                return Ok(());
            }

            let summary = ProcessReaper::new(SignalKiller).terminate(&report.pids);
            if summary.attempted_any() {
                tokio::time::sleep(Duration::from_millis(settle_ms)).await;
            }

            let after = probe.query(port).await;
            print_report(&after, cli.json)?;
            if !after.is_empty() {
                return Err(format!("port {} is still held by {:?}", port, after.pids).into());
            }
        }
    }

    Ok(())
}

fn print_report(report: &OccupancyReport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        let value = serde_json::json!({
            "port": report.port,
            "pids": report.pids,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if report.is_empty() {
        println!("port {} is free", report.port);
    } else {
        for pid in &report.pids {
            println!("{}", pid);
        }
    }
    Ok(())
}
