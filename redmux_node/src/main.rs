//! # Redundant Transport Node
//!
//! Drives a redundant set of transport media from a single-threaded
//! callback executor: pops everything the interfaces deliver, pushes a
//! periodic beacon over every path, and reopens paths that fail.
//!
//! # Usage
//!
//! ```bash
//! # Two redundant UDP paths
//! redmux_node --ifaces "192.168.0.10:9887 192.168.1.10:9887"
//!
//! # CAN transport with verbose logging
//! redmux_node --transport can --ifaces "can0 can1" -v
//! ```

#![deny(warnings)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use redmux::{Callback, Executor, Media, MediaError, MediaSet, OpenMedia};
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;

/// Largest MTU across the supported transports.
const RX_BUF_LEN: usize = 2048;

/// Beacon cadence and dead-path reopen cadence.
const BEACON_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transport {
    /// Multicast UDP datagrams.
    Udp,
    /// SocketCAN frames (Linux only).
    Can,
}

/// Redundant transport node - parallel paths over one poll loop
#[derive(Parser, Debug)]
#[command(name = "redmux_node")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Redundant transport node over a single-threaded callback executor")]
#[command(long_about = None)]
struct Args {
    /// Whitespace-separated interface list (at most three are used)
    #[arg(short, long, default_value = "127.0.0.1:9887")]
    ifaces: String,

    /// Transport family for every interface in the list
    #[arg(short, long, value_enum, default_value_t = Transport::Udp)]
    transport: Transport,

    /// Destination id for the outgoing beacon
    #[arg(short, long, default_value_t = 0x0042)]
    dest_id: u32,

    /// Poll timeout in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("node startup failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    setup_tracing(&args);

    info!("redmux node v{} starting...", env!("CARGO_PKG_VERSION"));

    let running = Arc::new(AtomicBool::new(true));
    let running_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running_flag.store(false, Ordering::SeqCst);
    })?;

    // Reception is opted into per transport: datagram media join the
    // destination's multicast group, frame media install an acceptance
    // filter. Re-applied after every reopen, since neither survives it.
    let dest_id = args.dest_id;
    match args.transport {
        Transport::Udp => run_loop::<redmux::media::udp::UdpMedia>(&args, &running, move |m| {
            m.join(*redmux::media::udp::multicast_group(dest_id).ip())
        }),
        #[cfg(target_os = "linux")]
        Transport::Can => run_loop::<redmux::media::can::CanMedia>(&args, &running, move |m| {
            m.set_filters(&[redmux::Filter {
                id: dest_id,
                mask: 0x1FFF_FFFF,
            }])
        }),
        #[cfg(not(target_os = "linux"))]
        Transport::Can => Err("the can transport requires Linux SocketCAN".into()),
    }
}

/// Pop-driven main loop, generic over the transport family.
fn run_loop<M: Media + OpenMedia>(
    args: &Args,
    running: &AtomicBool,
    configure: impl Fn(&mut M) -> Result<(), MediaError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let executor = Executor::new()?;

    let mut set: MediaSet<M> = MediaSet::new();
    set.parse(&args.ifaces);
    if set.is_empty() {
        return Err(format!("no usable interface in {:?}", args.ifaces).into());
    }
    for media in set.span() {
        if let Err(e) = configure(media) {
            warn!(iface = media.iface(), error = %e, "reception setup failed");
        }
    }
    info!(paths = set.len(), "redundant media configured");

    // One wake flag per path, set by the pop callback and consumed by
    // the drain pass below.
    let wake: Vec<Rc<Cell<bool>>> = (0..set.len())
        .map(|_| Rc::new(Cell::new(false)))
        .collect();
    let mut handles: Vec<Option<Callback<'_>>> = Vec::with_capacity(set.len());
    for (media, flag) in set.span().iter().zip(&wake) {
        let flag = Rc::clone(flag);
        handles.push(media.register_pop_callback(&executor, Box::new(move |_| flag.set(true)))?);
    }

    let mut rx_frames: u64 = 0;
    let mut tx_frames: u64 = 0;
    let mut buf = [0u8; RX_BUF_LEN];
    let mut next_beacon = Instant::now();

    while running.load(Ordering::SeqCst) {
        executor.poll_once(Some(Duration::from_millis(args.poll_ms)))?;

        for (index, media) in set.span().iter_mut().enumerate() {
            if !wake[index].replace(false) {
                continue;
            }
            loop {
                match media.pop(&mut buf) {
                    Ok(Some(meta)) => {
                        rx_frames += 1;
                        trace!(
                            iface = media.iface(),
                            id = meta.id,
                            len = meta.len,
                            "frame popped"
                        );
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(iface = media.iface(), error = %e, "receive path failed");
                        handles[index] = None;
                        media.try_reopen();
                        if let Err(e) = configure(media) {
                            warn!(iface = media.iface(), error = %e, "reception setup failed");
                        }
                        handles[index] = rearm(media, &executor, &wake[index])?;
                        break;
                    }
                }
            }
        }

        let now = Instant::now();
        if now >= next_beacon {
            next_beacon = now + BEACON_PERIOD;
            for (index, media) in set.span().iter_mut().enumerate() {
                // A path that lost its registration gets a reopen attempt
                // on the beacon cadence.
                if handles[index].is_none() {
                    media.try_reopen();
                    if let Err(e) = configure(media) {
                        warn!(iface = media.iface(), error = %e, "reception setup failed");
                    }
                    handles[index] = rearm(media, &executor, &wake[index])?;
                }
                match media.push(now, args.dest_id, b"beacon") {
                    Ok(true) => tx_frames += 1,
                    Ok(false) => trace!(iface = media.iface(), "transmit backpressure"),
                    Err(e) => warn!(iface = media.iface(), error = %e, "beacon push failed"),
                }
            }
            debug!(rx_frames, tx_frames, "path statistics");
        }
    }

    info!(rx_frames, tx_frames, "node stopped");
    Ok(())
}

/// Re-arm the pop callback of one path after a reopen attempt.
fn rearm<'e, M: Media>(
    media: &M,
    executor: &'e Executor,
    flag: &Rc<Cell<bool>>,
) -> Result<Option<Callback<'e>>, Box<dyn std::error::Error>> {
    let flag = Rc::clone(flag);
    let handle = media.register_pop_callback(executor, Box::new(move |_| flag.set(true)))?;
    if handle.is_none() {
        warn!(iface = media.iface(), "path stays unarmed until next beacon");
    }
    Ok(handle)
}

fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
