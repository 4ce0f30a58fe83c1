//! Kiosk payment simulator.
//!
//! Runs a [`BillAcceptor`] against a scripted validator and feeds it a list
//! of bills, crediting accepted ones against the amount due. Events are
//! printed to stdout as JSON lines; logs go to stderr and follow `RUST_LOG`.
//!
//! ```text
//! billgate-sim --amount-due 25 --bills 0x41,0x42,0x40,0x41
//! ```

use std::time::Duration;

use anyhow::{Context, bail};
use billgate_acceptor::{AcceptorConfig, AcceptorEvent, AcceptorEvents, BillAcceptor, RetryPolicy};
use billgate_hardware::mock::{MockTransport, MockTransportHandle};
use billgate_protocol::OutboundCommand;
use clap::Parser;
use rust_decimal::Decimal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "billgate-sim")]
#[command(about = "Simulate a kiosk payment against a scripted bill validator")]
struct Args {
    /// Amount the customer owes.
    #[arg(short, long, default_value = "20")]
    amount_due: Decimal,

    /// Bill-type codes to insert, in order (hex, e.g. 0x41).
    #[arg(short, long, value_delimiter = ',', value_parser = parse_code, default_value = "0x41,0x42,0x41")]
    bills: Vec<u8>,

    /// Keep-alive poll cadence.
    #[arg(long, default_value_t = 400)]
    poll_interval_ms: u64,

    /// Feed bills through the engine without the scripted device.
    #[arg(long)]
    simulate: bool,

    /// How long to wait for the device and for each bill.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
}

fn parse_code(s: &str) -> Result<u8, String> {
    let hex = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(hex, 16).map_err(|e| format!("invalid bill code {s:?}: {e}"))
}

fn acceptor_config(args: &Args) -> AcceptorConfig {
    AcceptorConfig::default()
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
        .with_simulation(args.simulate)
}

/// First escrow answer (ACK or REJECT) in a slice of the write log.
fn escrow_answer(written: &[u8]) -> Option<OutboundCommand> {
    written
        .iter()
        .filter_map(|&byte| OutboundCommand::from_byte(byte))
        .find(|command| matches!(command, OutboundCommand::Ack | OutboundCommand::Reject))
}

/// Play one bill on the device side: insert it, then stack or return it
/// depending on what the host answered.
async fn play_bill(device: &MockTransportHandle, code: u8, timeout: Duration) -> anyhow::Result<()> {
    let mark = device.written().len();
    device.insert_bill(code);

    let answered = device
        .wait_for_written(timeout, |written| {
            escrow_answer(written.get(mark..).unwrap_or_default()).is_some()
        })
        .await;
    if !answered {
        bail!("no answer to bill 0x{code:02x}");
    }

    match escrow_answer(&device.written_since(mark)) {
        Some(OutboundCommand::Ack) => device.stack(),
        _ => device.reject(),
    }
    Ok(())
}

async fn next_event(events: &mut AcceptorEvents, timeout: Duration) -> anyhow::Result<AcceptorEvent> {
    tokio::time::timeout(timeout, events.recv())
        .await
        .context("timed out waiting for bill outcome")?
        .context("acceptor event stream closed")
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = acceptor_config(&args);
    let timeout = Duration::from_millis(args.timeout_ms);

    info!(version = billgate_core::VERSION, "Starting payment simulation");
    let (transport, device) = MockTransport::with_name("Simulated Validator");
    let (acceptor, mut events) = BillAcceptor::new(transport, config)?;
    info!(
        poll_interval_ms = acceptor.config().poll_interval.as_millis() as u64,
        simulation = acceptor.config().simulation_enabled,
        "Acceptor configured"
    );

    let mut remaining = args.amount_due;
    acceptor.update_remaining_amount(remaining).await?;

    device.power_up();
    if !acceptor
        .connect_with_retry(&RetryPolicy::default(), Some(timeout))
        .await
    {
        bail!("validator did not come online");
    }

    for code in args.bills {
        if remaining <= Decimal::ZERO {
            info!("Nothing left to pay, ignoring remaining bills");
            break;
        }

        if args.simulate {
            acceptor.simulate_insert(code).await?;
        } else {
            play_bill(&device, code, timeout).await?;
        }

        let event = next_event(&mut events, timeout).await?;
        println!("{}", serde_json::to_string(&event)?);

        match event {
            AcceptorEvent::BillAccepted { amount } => {
                remaining -= Decimal::from(amount);
                acceptor.update_remaining_amount(remaining).await?;
                info!(amount, %remaining, "Bill credited");
            }
            AcceptorEvent::BillRejected { amount, reason } if reason.is_device_problem() => {
                warn!(amount, %reason, "Bill returned by the device");
            }
            AcceptorEvent::BillRejected { amount, reason } => {
                info!(amount, %reason, "Bill declined");
            }
        }
    }

    acceptor.disconnect().await;
    info!(%remaining, "Payment session finished");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run(Args::parse()).await
}
