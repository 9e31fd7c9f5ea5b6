use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{after, bounded, never, select, tick, unbounded, Receiver};

use audiofork::{
    start, stop, ChannelTap, Direction, ForkConfig, FrameSource, ReconnectPolicy,
    SessionEvent, SessionRegistry, SourceStatus, TlsOptions, VolumeAdjust, WsConnector,
    SAMPLES_PER_FRAME, SAMPLE_RATE,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream a generated test tone to a WebSocket audio sink")]
struct Args {
    /// ws:// or wss:// URL of the audio sink
    endpoint: String,

    /// Which audio direction to fork: in, out or both
    #[arg(long, default_value = "both")]
    direction: String,

    /// Maximum connection attempts before giving up
    #[arg(long, default_value_t = 5)]
    attempts: u32,

    /// Seconds to wait between connection attempts
    #[arg(long, default_value_t = 5)]
    delay: u64,

    /// Heard volume adjustment (-4..=4)
    #[arg(long, default_value_t = 0)]
    read_volume: i32,

    /// Spoken volume adjustment (-4..=4)
    #[arg(long, default_value_t = 0)]
    write_volume: i32,

    /// Accept invalid TLS certificates on wss:// endpoints
    #[arg(long)]
    insecure: bool,

    /// Command to run once the fork has finished
    #[arg(long)]
    post_command: Option<String>,

    /// Stop automatically after this many seconds (0 = run until ctrl-c)
    #[arg(long, default_value_t = 0)]
    duration: u64,

    /// Test tone frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    frequency: f32,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let registry = Arc::new(SessionRegistry::new());
    let tap = Arc::new(ChannelTap::new(SAMPLE_RATE));

    let mut config = ForkConfig::new(args.endpoint.clone());
    config.direction = Direction::parse_lenient(&args.direction);
    config.reconnect = ReconnectPolicy {
        max_attempts: args.attempts,
        delay: Duration::from_secs(args.delay),
    };
    config.volume = VolumeAdjust {
        read: args.read_volume,
        write: args.write_volume,
    };
    if args.insecure {
        config.tls = Some(TlsOptions {
            accept_invalid_certs: true,
        });
    }
    config.post_command = args.post_command.clone();

    let (event_tx, event_rx) = unbounded();
    let source: Arc<dyn FrameSource> = Arc::clone(&tap) as Arc<dyn FrameSource>;

    let id = start(
        &registry,
        source,
        Arc::new(WsConnector),
        config,
        Some(event_tx),
    )
    .context("could not start the audio fork")?;
    log::info!("forking session {} to {}", id, args.endpoint);

    // Tone producer: one 20ms frame per tick until the tap stops running.
    let producer_tap = Arc::clone(&tap);
    let frequency = args.frequency;
    let producer = thread::spawn(move || {
        let step = 2.0 * std::f32::consts::PI * frequency / producer_tap.sample_rate() as f32;
        let mut phase = 0f32;
        let ticker = tick(Duration::from_millis(20));

        for _ in ticker.iter() {
            if producer_tap.status() != SourceStatus::Running {
                break;
            }
            let samples: Vec<i16> = (0..SAMPLES_PER_FRAME)
                .map(|_| {
                    phase += step;
                    (phase.sin() * 8000.0) as i16
                })
                .collect();
            producer_tap.push_samples(samples, Direction::Both);
        }
    });

    let (sig_tx, sig_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = sig_tx.try_send(());
    })
    .context("failed to install signal handler")?;

    let deadline: Receiver<std::time::Instant> = if args.duration > 0 {
        after(Duration::from_secs(args.duration))
    } else {
        never()
    };

    let mut ended_early = false;
    loop {
        select! {
            recv(sig_rx) -> _ => {
                log::info!("interrupt received, stopping fork");
                break;
            }
            recv(deadline) -> _ => {
                log::info!("duration reached, stopping fork");
                break;
            }
            recv(event_rx) -> event => match event {
                Ok(SessionEvent::Terminated { frames_sent, reason }) => {
                    println!("session ended on its own: {} frames sent ({:?})", frames_sent, reason);
                    ended_early = true;
                    break;
                }
                Ok(other) => log::debug!("session event: {:?}", other),
                Err(_) => break,
            }
        }
    }

    if !ended_early {
        if let Err(e) = stop(&registry, Some(&id)) {
            log::debug!("stop: {}", e);
        }
        while let Ok(event) = event_rx.recv_timeout(Duration::from_secs(5)) {
            if let SessionEvent::Terminated { frames_sent, .. } = event {
                println!("session finished, {} frames sent", frames_sent);
                break;
            }
        }
    }

    producer.join().ok();
    Ok(())
}
