use log::{info, warn};
use std::error::Error;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use mio::unix::pipe::Receiver;
use mio::{Events, Interest, Poll, Registry, Token};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_mio::v1_0::Signals;

use sgpio::{Console, Consumer, Direction, DisconnectReason, GpioHandle, PinConfig, SysfsBackend};

const GPIO: Token = Token(0);
const STDIN: Token = Token(1);
const SIGNAL: Token = Token(2);

const EVENT_CAPACITY: usize = 16;
const CONSOLE_READ_SIZE: usize = 1024;

#[derive(Parser)]
#[command(
    name = "sgpio",
    version,
    about = "Drive a sysfs GPIO pin from an event loop"
)]
struct Cli {
    /// JSON pin configuration (falls back to $SGPIO_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log the value of an input pin on every edge
    Read {
        #[command(flatten)]
        pin: PinArgs,
        /// Edge mode (none, rising, falling, both)
        #[arg(short, long)]
        edge: Option<String>,
        /// Active low value (0, 1)
        #[arg(short, long)]
        active_low: Option<String>,
    },
    /// Drive an output pin from an interactive console
    Write {
        #[command(flatten)]
        pin: PinArgs,
    },
}

#[derive(Args)]
struct PinArgs {
    /// GPIO number
    #[arg(short = 'n', long)]
    gpio_no: Option<u32>,
    /// sysfs gpio control directory
    #[arg(long)]
    root: Option<PathBuf>,
}

struct ReadLogger;

impl Consumer for ReadLogger {
    fn on_connected(&mut self) {
        info!("Connection is made");
    }

    fn on_data_received(&mut self, data: &[u8]) {
        info!("Read value: {}", String::from_utf8_lossy(data));
    }

    fn on_disconnected(&mut self, reason: &DisconnectReason) {
        info!("Connection is lost: {reason}");
    }
}

struct WriteLogger;

impl Consumer for WriteLogger {
    fn on_connected(&mut self) {
        info!("Connection is made");
    }

    fn on_disconnected(&mut self, reason: &DisconnectReason) {
        info!("Connection is lost: {reason}");
    }
}

fn resolve_config(
    config_path: Option<PathBuf>,
    args: &PinArgs,
    direction: Direction,
) -> Result<PinConfig, Box<dyn Error>> {
    let config_path = config_path.or_else(|| std::env::var_os("SGPIO_CONFIG").map(PathBuf::from));

    let mut config = match (config_path, args.gpio_no) {
        (Some(path), _) => PinConfig::load_from_file(path)?,
        (None, Some(pin)) => PinConfig::new(pin, direction.as_str()),
        (None, None) => return Err("either --gpio-no or a config file must be given".into()),
    };
    if let Some(pin) = args.gpio_no {
        config.pin = pin;
    }
    if let Some(root) = &args.root {
        config.control_root = root.clone();
    }
    config.direction = direction.as_str().to_string();

    Ok(config)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();

    let poll = Poll::new()?;
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    poll.registry()
        .register(&mut signals, SIGNAL, Interest::READABLE)?;

    match cli.command {
        Command::Read {
            pin,
            edge,
            active_low,
        } => {
            let mut config = resolve_config(cli.config, &pin, Direction::In)?;
            if let Some(edge) = edge {
                config.edge = edge;
            }
            if active_low.is_some() {
                config.active_low = active_low;
            }

            let handle = GpioHandle::new(&config, ReadLogger, poll.registry(), GPIO)?;
            serve(poll, signals, handle, None)
        }
        Command::Write { pin } => {
            let config = resolve_config(cli.config, &pin, Direction::Out)?;

            let handle = GpioHandle::new(&config, WriteLogger, poll.registry(), GPIO)?;
            let console = Console::new(handle.pin());
            serve(poll, signals, handle, Some(console))
        }
    }
}

fn serve<C: Consumer>(
    mut poll: Poll,
    mut signals: Signals,
    mut handle: GpioHandle<C>,
    mut console: Option<Console>,
) -> Result<(), Box<dyn Error>> {
    let mut events = Events::with_capacity(EVENT_CAPACITY);

    let mut stdin = None;
    if let Some(active) = console.as_mut() {
        print!("{}", sgpio::console::BANNER);
        print_prompt(active)?;
        // Unbuffered and non-blocking, std's buffer would hide data from the
        // poller.
        let input = Receiver::from(io::stdin().as_fd().try_clone_to_owned()?);
        input.set_nonblocking(true)?;
        stdin = attach_stdin(poll.registry(), active, input, &mut handle)?;
        if stdin.is_none() {
            console = None;
        }
    }

    'serve: while handle.is_active() {
        // stdin is gone: finish the queued writes, then stop
        if console.is_none() && handle.direction() == Direction::Out && handle.pending_writes() == 0
        {
            break;
        }

        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e.into());
        }

        for event in events.iter() {
            match event.token() {
                GPIO => {
                    if event.is_readable() {
                        handle.on_readable();
                    }
                    if event.is_writable() {
                        handle.on_writable();
                    }
                }
                STDIN => {
                    let (Some(active), Some(input)) = (console.as_mut(), stdin.as_mut()) else {
                        continue;
                    };
                    if !pump_console(active, input, &mut handle)? {
                        poll.registry().deregister(input)?;
                        release_stdin(input);
                        console = None;
                        stdin = None;
                    }
                }
                SIGNAL => {
                    if signals.pending().next().is_some() {
                        info!("Interrupted, shutting down");
                        break 'serve;
                    }
                }
                _ => {}
            }
        }
    }

    if let Some(input) = &stdin {
        release_stdin(input);
    }
    handle.disconnect(DisconnectReason::Done);
    Ok(())
}

/// Registers stdin with the loop. epoll refuses regular files, so input
/// redirected from a file is fed to the console right away and `None` is
/// returned.
fn attach_stdin<C: Consumer, B: SysfsBackend>(
    registry: &Registry,
    console: &mut Console,
    mut input: Receiver,
    handle: &mut GpioHandle<C, B>,
) -> io::Result<Option<Receiver>> {
    match registry.register(&mut input, STDIN, Interest::READABLE) {
        Ok(()) => Ok(Some(input)),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            info!("stdin cannot be polled, reading it to the end");
            while pump_console(console, &mut input, handle)? {}
            release_stdin(&input);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Feeds everything stdin has buffered to the console and queues the
/// resulting levels. Returns `false` on EOF.
fn pump_console<C: Consumer, B: SysfsBackend>(
    console: &mut Console,
    stdin: &mut impl Read,
    handle: &mut GpioHandle<C, B>,
) -> io::Result<bool> {
    let mut buf = [0u8; CONSOLE_READ_SIZE];
    let open = loop {
        match stdin.read(&mut buf) {
            Ok(0) => break false,
            Ok(n) => queue_levels(handle, console.feed(&buf[..n])),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break true,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    };

    if open {
        print_prompt(console)?;
    } else {
        queue_levels(handle, console.finish());
        println!();
    }
    Ok(open)
}

fn queue_levels<C: Consumer, B: SysfsBackend>(
    handle: &mut GpioHandle<C, B>,
    levels: impl IntoIterator<Item = &'static str>,
) {
    for level in levels {
        if let Err(e) = handle.write(level) {
            warn!("Cannot write {level}: {e}");
        }
    }
}

// The descriptor is shared with the parent shell.
fn release_stdin(input: &Receiver) {
    if let Err(e) = input.set_nonblocking(false) {
        warn!("Cannot restore blocking stdin: {e}");
    }
}

fn print_prompt(console: &Console) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    write!(stdout, "{}", console.prompt())?;
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::fd::OwnedFd;

    use mio::unix::pipe;
    use sgpio::MockSysfs;

    const PIN: u32 = 21;

    struct Bench {
        _dir: tempfile::TempDir,
        poll: Poll,
        sysfs: MockSysfs,
    }

    impl Bench {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let sysfs = MockSysfs::new(dir.path().join("gpio")).unwrap();
            Self {
                _dir: dir,
                poll: Poll::new().unwrap(),
                sysfs,
            }
        }

        fn output(&self) -> GpioHandle<WriteLogger, &MockSysfs> {
            let config = PinConfig::output(PIN).with_control_root(self.sysfs.root());
            GpioHandle::with_backend(
                &self.sysfs,
                &config,
                WriteLogger,
                self.poll.registry(),
                GPIO,
            )
            .unwrap()
        }
    }

    #[test]
    fn pump_console_drains_more_than_one_read_buffer() {
        let bench = Bench::new();
        let mut handle = bench.output();
        let mut console = Console::new(PIN);
        let (mut sender, mut receiver) = pipe::new().unwrap();

        let input = "1\n".repeat(600);
        assert!(input.len() > CONSOLE_READ_SIZE);
        sender.write_all(input.as_bytes()).unwrap();

        let open = pump_console(&mut console, &mut receiver, &mut handle);
        assert!(open.unwrap());
        assert_eq!(handle.pending_writes(), 600);

        drop(sender);
        let open = pump_console(&mut console, &mut receiver, &mut handle);
        assert!(!open.unwrap());
        assert_eq!(handle.pending_writes(), 600);
    }

    #[test]
    fn pump_console_flushes_unterminated_line_at_eof() {
        let bench = Bench::new();
        let mut handle = bench.output();
        let mut console = Console::new(PIN);
        let (mut sender, mut receiver) = pipe::new().unwrap();

        sender.write_all(b"1\noff").unwrap();
        drop(sender);

        let open = pump_console(&mut console, &mut receiver, &mut handle);
        assert!(!open.unwrap());
        assert_eq!(handle.pending_writes(), 2);
        handle.on_writable();
        assert_eq!(bench.sysfs.writes_to("value"), vec!["1", "0"]);
    }

    #[test]
    fn stdin_redirected_from_a_file_is_read_to_the_end() {
        let bench = Bench::new();
        let mut handle = bench.output();
        let mut console = Console::new(PIN);

        let levels = bench.sysfs.root().join("levels.txt");
        std::fs::write(&levels, "on\n0\n\nlow\ntrue").unwrap();
        let input = Receiver::from(OwnedFd::from(File::open(&levels).unwrap()));

        let registry = bench.poll.registry();
        let attached = attach_stdin(registry, &mut console, input, &mut handle);
        assert!(attached.unwrap().is_none());
        assert_eq!(handle.pending_writes(), 4);

        handle.on_writable();
        assert_eq!(bench.sysfs.writes_to("value"), vec!["1", "0", "0", "1"]);
        assert!(handle.is_active());
    }
}
